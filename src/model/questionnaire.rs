use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type QuestionnaireId = u32;
pub type QuestionId = u32;
pub type OptionId = u32;

/// The closed set of question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    /// Free text input.
    #[serde(rename = "texto")]
    Text,
    /// Exactly one option.
    #[serde(rename = "select_single")]
    SelectSingle,
    /// Any number of options, optionally capped by `limite_respostas`.
    #[serde(rename = "select_multiple")]
    SelectMultiple,
}

impl QuestionType {
    /// Does this kind of question carry options?
    pub fn is_choice(self) -> bool {
        matches!(self, Self::SelectSingle | Self::SelectMultiple)
    }

    fn literal(self) -> &'static str {
        match self {
            Self::Text => "texto",
            Self::SelectSingle => "select_single",
            Self::SelectMultiple => "select_multiple",
        }
    }
}

impl Display for QuestionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.literal())
    }
}

/// Returned when a question type literal is not one of the recognised ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownQuestionType(pub String);

impl FromStr for QuestionType {
    type Err = UnknownQuestionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "texto" => Ok(Self::Text),
            "select_single" => Ok(Self::SelectSingle),
            "select_multiple" => Ok(Self::SelectMultiple),
            other => Err(UnknownQuestionType(other.to_string())),
        }
    }
}

/// A questionnaire together with its full question/option graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub id: QuestionnaireId,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "descricao")]
    pub description: Option<String>,
    /// Questions in authoring order.
    #[serde(rename = "perguntas")]
    pub questions: Vec<Question>,
}

impl Questionnaire {
    /// Get the question with the given ID, if it belongs to this questionnaire.
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == id)
    }
}

/// A questionnaire without its questions, as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireSummary {
    pub id: QuestionnaireId,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "descricao")]
    pub description: Option<String>,
}

impl From<&Questionnaire> for QuestionnaireSummary {
    fn from(questionnaire: &Questionnaire) -> Self {
        Self {
            id: questionnaire.id,
            title: questionnaire.title.clone(),
            description: questionnaire.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "questionario_id")]
    pub questionnaire_id: QuestionnaireId,
    /// Zero-based position within the questionnaire.
    #[serde(rename = "ordem")]
    pub position: u32,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "tipo")]
    pub kind: QuestionType,
    /// Maximum number of selections; only ever set on multiple choice questions.
    #[serde(rename = "limite_respostas")]
    pub response_limit: Option<u32>,
    /// Options in authoring order. Empty for text questions.
    #[serde(rename = "opcoes")]
    pub options: Vec<QuestionOption>,
}

impl Question {
    /// Get the option with the given ID, if it belongs to this question.
    pub fn option(&self, id: OptionId) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    #[serde(rename = "questao_id")]
    pub question_id: QuestionId,
    #[serde(rename = "ordem")]
    pub position: u32,
    #[serde(rename = "texto")]
    pub text: String,
}

/// Questionnaire row data prior to insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestionnaire {
    pub title: String,
    pub description: Option<String>,
}

/// A validated question prior to insertion, carrying its option texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub text: String,
    pub kind: QuestionType,
    pub response_limit: Option<u32>,
    pub options: Vec<String>,
}

impl NewQuestion {
    /// Attach the identities generated on insertion.
    pub fn into_question(
        self,
        id: QuestionId,
        questionnaire_id: QuestionnaireId,
        position: u32,
        option_ids: Vec<OptionId>,
    ) -> Question {
        let options = self
            .options
            .into_iter()
            .zip(option_ids)
            .zip(0..)
            .map(|((text, option_id), position)| QuestionOption {
                id: option_id,
                question_id: id,
                position,
                text,
            })
            .collect();
        Question {
            id,
            questionnaire_id,
            position,
            text: self.text,
            kind: self.kind,
            response_limit: self.response_limit,
            options,
        }
    }
}
