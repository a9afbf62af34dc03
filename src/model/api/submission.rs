use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Issue, Reason, ValidationError};
use crate::model::{
    questionnaire::{QuestionId, QuestionnaireId},
    response::{NewResponseSet, ResponseSetId},
};

/// A respondent's answers to a questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub questionario_id: QuestionnaireId,
    pub nome: String,
    pub email: String,
    /// Raw values per question: the text for text questions, option IDs for
    /// choice questions. Ordered by question ID.
    #[serde(default)]
    pub respostas: BTreeMap<QuestionId, Vec<String>>,
}

impl Submission {
    /// Check the respondent details and split off the response set row.
    pub fn into_parts(
        self,
    ) -> Result<(NewResponseSet, BTreeMap<QuestionId, Vec<String>>), ValidationError> {
        let mut issues = Vec::new();

        let name = self.nome.trim().to_string();
        if name.is_empty() {
            issues.push(Issue::general(Reason::EmptyRespondentName));
        }
        let email = self.email.trim().to_string();
        if !is_plausible_email(&email) {
            issues.push(Issue::general(Reason::InvalidRespondentEmail));
        }

        if !issues.is_empty() {
            return Err(ValidationError { issues });
        }

        let response_set = NewResponseSet {
            questionnaire_id: self.questionario_id,
            name,
            email,
        };
        Ok((response_set, self.respostas))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Returned once a submission has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub message: String,
    pub id: ResponseSetId,
    /// Number of answer records written.
    pub count: usize,
}

impl SubmissionReceipt {
    pub fn new(id: ResponseSetId, count: usize) -> Self {
        Self {
            message: "ok".to_string(),
            id,
            count,
        }
    }
}
