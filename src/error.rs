use std::fmt::{Display, Formatter};
use std::io::Cursor;

use argon2::Error as Argon2Error;
use jsonwebtoken::errors::Error as JwtError;
use log::{error, warn};
use mongodb::error::Error as DbError;
use rocket::{
    http::{ContentType, Status, StatusClass},
    response::{Responder, Response},
    serde::json::{serde_json, Error as JsonError},
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::questionnaire::{OptionId, QuestionId, QuestionnaireId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(ValidationError),
    #[error("Not found: {0}")]
    NotFound(NotFound),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation failure with a single issue.
    pub fn invalid(issue: Issue) -> Self {
        Self::Validation(ValidationError::from(issue))
    }

    fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Persistence(_) | Self::Internal(_) => Status::InternalServerError,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Persistence(_) => "persistence",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<NotFound> for Error {
    fn from(err: NotFound) -> Self {
        Self::NotFound(err)
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Self::Persistence(err.into())
    }
}

impl From<JwtError> for Error {
    fn from(err: JwtError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<Argon2Error> for Error {
    fn from(err: Argon2Error) -> Self {
        Self::Internal(format!("Password hashing failed: {err}"))
    }
}

impl From<JsonError<'_>> for Error {
    fn from(err: JsonError<'_>) -> Self {
        let detail = match err {
            JsonError::Io(err) => err.to_string(),
            JsonError::Parse(_, err) => err.to_string(),
        };
        Self::invalid(Issue::general(Reason::MalformedBody { detail }))
    }
}

/// Storage-layer failures. These always abort the surrounding transaction.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{entity} {id} references missing {parent} {parent_id}")]
    ForeignKey {
        entity: &'static str,
        id: u32,
        parent: &'static str,
        parent_id: u32,
    },
    #[error("Constraint violated: {0}")]
    Constraint(String),
}

/// Something referenced by a request does not exist where it was expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum NotFound {
    Questionnaire {
        questionnaire: QuestionnaireId,
    },
    Question {
        questionnaire: QuestionnaireId,
        question: QuestionId,
    },
    Option {
        question: QuestionId,
        option: String,
    },
}

impl Display for NotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Questionnaire { questionnaire } => write!(f, "questionnaire {questionnaire}"),
            Self::Question {
                questionnaire,
                question,
            } => write!(f, "question {question} in questionnaire {questionnaire}"),
            Self::Option { question, option } => {
                write!(f, "option {option} for question {question}")
            }
        }
    }
}

/// Every rule a request broke, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl ValidationError {
    /// The reasons alone, handy for matching on.
    pub fn reasons(&self) -> Vec<&Reason> {
        self.issues.iter().map(|issue| &issue.reason).collect()
    }
}

impl From<Issue> for ValidationError {
    fn from(issue: Issue) -> Self {
        Self {
            issues: vec![issue],
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let issues = self
            .issues
            .iter()
            .map(Issue::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{issues}")
    }
}

/// A single broken rule, located by question index (authoring) or question
/// id (submission) where one applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionId>,
    pub reason: Reason,
}

impl Issue {
    pub fn general(reason: Reason) -> Self {
        Self {
            index: None,
            question: None,
            reason,
        }
    }

    pub fn at_index(index: usize, reason: Reason) -> Self {
        Self {
            index: Some(index),
            question: None,
            reason,
        }
    }

    pub fn for_question(question: QuestionId, reason: Reason) -> Self {
        Self {
            index: None,
            question: Some(question),
            reason,
        }
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.index, self.question) {
            (Some(index), _) => write!(f, "question #{index}: {}", self.reason),
            (None, Some(question)) => write!(f, "question {question}: {}", self.reason),
            (None, None) => write!(f, "{}", self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Reason {
    EmptyTitle,
    EmptyQuestionText,
    UnknownQuestionType { tipo: String },
    MissingOptions,
    OptionsNotAllowed,
    LimitNotAllowed,
    InvalidLimit { limit: i64, options: usize },
    EmptyRespondentName,
    InvalidRespondentEmail,
    TextAnswerArity { values: usize },
    SingleChoiceArity { values: usize },
    TooManySelections { limit: u32, selected: usize },
    DuplicateSelection { option: OptionId },
    QuestionHasNoOptions,
    MalformedBody { detail: String },
    EmptyUsername,
    PasswordTooShort { min: usize },
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "title must not be empty"),
            Self::EmptyQuestionText => write!(f, "question text must not be empty"),
            Self::UnknownQuestionType { tipo } => write!(f, "unknown question type '{tipo}'"),
            Self::MissingOptions => write!(f, "choice questions need at least one option"),
            Self::OptionsNotAllowed => write!(f, "text questions cannot have options"),
            Self::LimitNotAllowed => {
                write!(f, "only multiple choice questions can limit selections")
            }
            Self::InvalidLimit { limit, options } => write!(
                f,
                "selection limit {limit} must be between 1 and the {options} supplied options"
            ),
            Self::EmptyRespondentName => write!(f, "respondent name must not be empty"),
            Self::InvalidRespondentEmail => write!(f, "respondent email is not valid"),
            Self::TextAnswerArity { values } => {
                write!(f, "text questions take exactly one value, got {values}")
            }
            Self::SingleChoiceArity { values } => {
                write!(f, "single choice questions take exactly one option, got {values}")
            }
            Self::TooManySelections { limit, selected } => {
                write!(f, "at most {limit} options may be selected, got {selected}")
            }
            Self::DuplicateSelection { option } => write!(f, "option {option} selected twice"),
            Self::QuestionHasNoOptions => write!(f, "question has no options to choose from"),
            Self::MalformedBody { detail } => write!(f, "malformed request body: {detail}"),
            Self::EmptyUsername => write!(f, "username must not be empty"),
            Self::PasswordTooShort { min } => {
                write!(f, "password must be at least {min} characters")
            }
        }
    }
}

/// The JSON body sent back with every error response.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<&'a [Issue]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<&'a NotFound>,
}

impl ErrorBody<'_> {
    fn respond<'o>(&self, status: Status) -> rocket::response::Result<'o> {
        let json = serde_json::to_string(self).map_err(|_| Status::InternalServerError)?;

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        let message = match &self {
            Self::Persistence(err) => {
                error!("{} {}: {err}", req.method(), req.uri());
                "Internal storage failure".to_string()
            }
            Self::Internal(err) => {
                error!("{} {}: {err}", req.method(), req.uri());
                "Internal server error".to_string()
            }
            other => {
                warn!("{} {}: {other}", req.method(), req.uri());
                other.to_string()
            }
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
            issues: match &self {
                Self::Validation(err) => Some(err.issues.as_slice()),
                _ => None,
            },
            missing: match &self {
                Self::NotFound(missing) => Some(missing),
                _ => None,
            },
        };
        body.respond(status)
    }
}

/// Why a request guard refused a request, left in the request cache for
/// the catcher.
pub struct GuardFailure(pub Option<String>);

/// Error response for a request that never produced one of its own: no
/// matching route, or a failing guard.
pub struct Caught(pub Status);

impl<'r, 'o: 'r> Responder<'r, 'o> for Caught {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let Self(status) = self;
        let error = match status.code {
            400 | 422 => "validation",
            401 => "unauthorized",
            404 => "not_found",
            _ if status.class() == StatusClass::ServerError => "internal",
            _ => "error",
        };
        let message = match req.local_cache(|| GuardFailure(None)) {
            GuardFailure(Some(reason)) => reason.clone(),
            GuardFailure(None) => status.reason_lossy().to_string(),
        };
        ErrorBody {
            error,
            message,
            issues: None,
            missing: None,
        }
        .respond(status)
    }
}

#[catch(default)]
fn catch_all(status: Status, _req: &Request<'_>) -> Caught {
    Caught(status)
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![catch_all]
}
