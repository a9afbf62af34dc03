use serde::{Deserialize, Serialize};

use crate::error::{Issue, Reason, ValidationError};
use crate::model::questionnaire::{NewQuestion, NewQuestionnaire, QuestionType};

/// A questionnaire definition as submitted by an author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireSpec {
    /// Questionnaire title.
    pub titulo: String,
    /// Optional free-form description.
    #[serde(default)]
    pub descricao: Option<String>,
    /// Questions, in the order they should be presented.
    #[serde(default)]
    pub perguntas: Vec<QuestionSpec>,
}

/// A question definition as submitted by an author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSpec {
    /// Question text.
    pub texto: String,
    /// One of `texto`, `select_single` or `select_multiple`. Kept as a raw
    /// string so unknown literals can be reported against the question.
    pub tipo: String,
    /// Option texts for choice questions. Blank entries are ignored.
    #[serde(default)]
    pub opcoes: Vec<String>,
    /// Maximum number of selections for `select_multiple`.
    #[serde(default)]
    pub limite_respostas: Option<i64>,
}

impl QuestionnaireSpec {
    /// Check every structural rule, reporting all offending questions at
    /// once. Nothing here touches storage.
    pub fn validate(self) -> Result<(NewQuestionnaire, Vec<NewQuestion>), ValidationError> {
        let mut issues = Vec::new();

        let title = self.titulo.trim().to_string();
        if title.is_empty() {
            issues.push(Issue::general(Reason::EmptyTitle));
        }
        let description = self
            .descricao
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let mut questions = Vec::with_capacity(self.perguntas.len());
        for (index, spec) in self.perguntas.into_iter().enumerate() {
            match spec.validate() {
                Ok(question) => questions.push(question),
                Err(reasons) => issues.extend(
                    reasons
                        .into_iter()
                        .map(|reason| Issue::at_index(index, reason)),
                ),
            }
        }

        if issues.is_empty() {
            Ok((NewQuestionnaire { title, description }, questions))
        } else {
            Err(ValidationError { issues })
        }
    }
}

impl QuestionSpec {
    /// Check this question on its own, returning every rule it breaks.
    pub fn validate(self) -> Result<NewQuestion, Vec<Reason>> {
        let mut reasons = Vec::new();

        let text = self.texto.trim().to_string();
        if text.is_empty() {
            reasons.push(Reason::EmptyQuestionText);
        }

        let options: Vec<String> = self
            .opcoes
            .iter()
            .map(|option| option.trim())
            .filter(|option| !option.is_empty())
            .map(str::to_string)
            .collect();

        let kind = match self.tipo.trim().parse::<QuestionType>() {
            Ok(kind) => Some(kind),
            Err(unknown) => {
                reasons.push(Reason::UnknownQuestionType { tipo: unknown.0 });
                None
            }
        };

        let mut response_limit = None;
        match kind {
            Some(QuestionType::Text) => {
                if !options.is_empty() {
                    reasons.push(Reason::OptionsNotAllowed);
                }
                if self.limite_respostas.is_some() {
                    reasons.push(Reason::LimitNotAllowed);
                }
            }
            Some(QuestionType::SelectSingle) => {
                if options.is_empty() {
                    reasons.push(Reason::MissingOptions);
                }
                if self.limite_respostas.is_some() {
                    reasons.push(Reason::LimitNotAllowed);
                }
            }
            Some(QuestionType::SelectMultiple) => {
                if options.is_empty() {
                    reasons.push(Reason::MissingOptions);
                } else if let Some(limit) = self.limite_respostas {
                    match u32::try_from(limit) {
                        Ok(valid) if valid >= 1 && valid as usize <= options.len() => {
                            response_limit = Some(valid)
                        }
                        _ => reasons.push(Reason::InvalidLimit {
                            limit,
                            options: options.len(),
                        }),
                    }
                }
            }
            None => {}
        }

        match kind {
            Some(kind) if reasons.is_empty() => Ok(NewQuestion {
                text,
                kind,
                response_limit,
                options: if kind.is_choice() { options } else { Vec::new() },
            }),
            _ => Err(reasons),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl QuestionnaireSpec {
        /// A text question followed by a single choice question.
        pub fn satisfaction() -> Self {
            Self {
                titulo: "Satisfaction".to_string(),
                descricao: Some("How did we do?".to_string()),
                perguntas: vec![QuestionSpec::comments(), QuestionSpec::pick_one()],
            }
        }

        /// A single multiple choice question limited to two of three options.
        pub fn toppings() -> Self {
            Self {
                titulo: "Pizza".to_string(),
                descricao: None,
                perguntas: vec![QuestionSpec::toppings()],
            }
        }
    }

    impl QuestionSpec {
        pub fn comments() -> Self {
            Self {
                texto: "Comments".to_string(),
                tipo: "texto".to_string(),
                opcoes: vec![],
                limite_respostas: None,
            }
        }

        pub fn pick_one() -> Self {
            Self {
                texto: "Pick one".to_string(),
                tipo: "select_single".to_string(),
                opcoes: vec!["A".to_string(), "B".to_string()],
                limite_respostas: None,
            }
        }

        pub fn toppings() -> Self {
            Self {
                texto: "Choose up to two toppings".to_string(),
                tipo: "select_multiple".to_string(),
                opcoes: vec![
                    "Cheese".to_string(),
                    "Olives".to_string(),
                    "Basil".to_string(),
                ],
                limite_respostas: Some(2),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_spec_keeps_order_and_options() {
        let (questionnaire, questions) = QuestionnaireSpec::satisfaction().validate().unwrap();
        assert_eq!(questionnaire.title, "Satisfaction");
        assert_eq!(questionnaire.description.as_deref(), Some("How did we do?"));
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].kind, QuestionType::Text);
        assert!(questions[0].options.is_empty());
        assert_eq!(questions[1].kind, QuestionType::SelectSingle);
        assert_eq!(questions[1].options, vec!["A", "B"]);
    }

    #[test]
    fn blank_options_are_dropped() {
        let mut spec = QuestionSpec::pick_one();
        spec.opcoes = vec![" A ".into(), "".into(), "   ".into(), "B".into()];
        let question = spec.validate().unwrap();
        assert_eq!(question.options, vec!["A", "B"]);

        let mut spec = QuestionSpec::pick_one();
        spec.opcoes = vec!["".into(), " ".into()];
        assert_eq!(spec.validate().unwrap_err(), vec![Reason::MissingOptions]);
    }

    #[test]
    fn unknown_type_is_reported_with_its_index() {
        let mut spec = QuestionnaireSpec::satisfaction();
        spec.perguntas[1].tipo = "slider".to_string();
        let err = spec.validate().unwrap_err();
        assert_eq!(
            err.issues,
            vec![Issue::at_index(
                1,
                Reason::UnknownQuestionType {
                    tipo: "slider".to_string()
                }
            )]
        );
    }

    #[test]
    fn all_offending_questions_are_reported() {
        let mut spec = QuestionnaireSpec::satisfaction();
        spec.titulo = "  ".to_string();
        spec.perguntas[0].opcoes = vec!["nope".to_string()];
        spec.perguntas[1].texto = String::new();
        spec.perguntas[1].limite_respostas = Some(1);
        let err = spec.validate().unwrap_err();
        assert_eq!(
            err.issues,
            vec![
                Issue::general(Reason::EmptyTitle),
                Issue::at_index(0, Reason::OptionsNotAllowed),
                Issue::at_index(1, Reason::EmptyQuestionText),
                Issue::at_index(1, Reason::LimitNotAllowed),
            ]
        );
    }

    #[test]
    fn text_questions_cannot_limit() {
        let mut spec = QuestionSpec::comments();
        spec.limite_respostas = Some(1);
        assert_eq!(spec.validate().unwrap_err(), vec![Reason::LimitNotAllowed]);
    }

    #[test]
    fn multiple_choice_limit_bounds() {
        for (limit, ok) in [(0, false), (-1, false), (1, true), (3, true), (4, false)] {
            let mut spec = QuestionSpec::toppings();
            spec.limite_respostas = Some(limit);
            match spec.validate() {
                Ok(question) => {
                    assert!(ok, "limit {limit} should be rejected");
                    assert_eq!(question.response_limit, Some(limit as u32));
                }
                Err(reasons) => {
                    assert!(!ok, "limit {limit} should be accepted");
                    assert_eq!(reasons, vec![Reason::InvalidLimit { limit, options: 3 }]);
                }
            }
        }

        let mut spec = QuestionSpec::toppings();
        spec.limite_respostas = None;
        assert_eq!(spec.validate().unwrap().response_limit, None);
    }

    #[test]
    fn wire_format_uses_form_field_names() {
        let raw = r#"{
            "titulo": "T",
            "perguntas": [{"texto": "Q", "tipo": "select_multiple", "opcoes": ["x", "y"], "limite_respostas": 2}]
        }"#;
        let spec: QuestionnaireSpec =
            rocket::serde::json::serde_json::from_str(raw).unwrap();
        assert!(spec.descricao.is_none());
        let (_, questions) = spec.validate().unwrap();
        assert_eq!(questions[0].response_limit, Some(2));
    }
}
