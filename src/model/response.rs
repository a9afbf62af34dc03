use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Issue, NotFound, Reason, Result};
use crate::model::questionnaire::{
    OptionId, Question, QuestionId, QuestionType, QuestionnaireId,
};

pub type ResponseSetId = u32;
pub type AnswerId = u32;

/// One respondent's submission against a questionnaire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSet {
    pub id: ResponseSetId,
    #[serde(rename = "questionario_id")]
    pub questionnaire_id: QuestionnaireId,
    #[serde(rename = "nome")]
    pub name: String,
    pub email: String,
    #[serde(rename = "respostas")]
    pub answers: Vec<AnswerRecord>,
}

/// Response set row data prior to insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponseSet {
    pub questionnaire_id: QuestionnaireId,
    pub name: String,
    pub email: String,
}

/// A single stored answer. Multiple choice questions produce one record per
/// selected option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: AnswerId,
    #[serde(rename = "resposta_questionario_id")]
    pub response_set_id: ResponseSetId,
    #[serde(rename = "questao_id")]
    pub question_id: QuestionId,
    #[serde(flatten)]
    pub payload: AnswerPayload,
}

/// Answer record data prior to insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswerRecord {
    pub response_set_id: ResponseSetId,
    pub question_id: QuestionId,
    pub payload: AnswerPayload,
}

/// What an answer record holds: free text or a reference to an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerPayload {
    #[serde(rename = "resposta_texto")]
    Text(String),
    #[serde(rename = "opcao_id")]
    Option(OptionId),
}

/// A raw answer resolved against the type of the question it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text { value: String },
    SingleChoice { option_id: OptionId },
    MultipleChoice { option_ids: Vec<OptionId> },
}

impl Answer {
    /// Interpret the submitted values for `question` according to its type.
    ///
    /// Text questions take exactly one value, stored verbatim. Choice
    /// questions take option IDs, each of which must belong to `question`;
    /// multiple choice questions additionally respect `limite_respostas`.
    pub fn resolve(question: &Question, values: Vec<String>) -> Result<Self> {
        let reject = |reason| Err(Error::invalid(Issue::for_question(question.id, reason)));

        if question.kind.is_choice() && question.options.is_empty() {
            return reject(Reason::QuestionHasNoOptions);
        }

        match question.kind {
            QuestionType::Text => {
                if values.len() != 1 {
                    return reject(Reason::TextAnswerArity {
                        values: values.len(),
                    });
                }
                let value = values.into_iter().next().unwrap_or_default();
                Ok(Self::Text { value })
            }
            QuestionType::SelectSingle => {
                if values.len() != 1 {
                    return reject(Reason::SingleChoiceArity {
                        values: values.len(),
                    });
                }
                let option_id = resolve_option(question, &values[0])?;
                Ok(Self::SingleChoice { option_id })
            }
            QuestionType::SelectMultiple => {
                if let Some(limit) = question.response_limit {
                    if values.len() > limit as usize {
                        return reject(Reason::TooManySelections {
                            limit,
                            selected: values.len(),
                        });
                    }
                }
                let mut seen = HashSet::new();
                let mut option_ids = Vec::with_capacity(values.len());
                for value in &values {
                    let option_id = resolve_option(question, value)?;
                    if !seen.insert(option_id) {
                        return reject(Reason::DuplicateSelection { option: option_id });
                    }
                    option_ids.push(option_id);
                }
                Ok(Self::MultipleChoice { option_ids })
            }
        }
    }

    /// The record payloads to store for this answer, in selection order.
    pub fn into_payloads(self) -> Vec<AnswerPayload> {
        match self {
            Self::Text { value } => vec![AnswerPayload::Text(value)],
            Self::SingleChoice { option_id } => vec![AnswerPayload::Option(option_id)],
            Self::MultipleChoice { option_ids } => {
                option_ids.into_iter().map(AnswerPayload::Option).collect()
            }
        }
    }
}

/// Parse `value` as an option ID and check it belongs to `question`.
fn resolve_option(question: &Question, value: &str) -> Result<OptionId> {
    value
        .trim()
        .parse::<OptionId>()
        .ok()
        .and_then(|id| question.option(id))
        .map(|option| option.id)
        .ok_or_else(|| {
            NotFound::Option {
                question: question.id,
                option: value.to_string(),
            }
            .into()
        })
}
