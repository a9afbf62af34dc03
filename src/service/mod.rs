//! The operations behind the API: questionnaire authoring and response
//! recording. Each one runs in exactly one store transaction.

use log::{error, warn};

use crate::error::Error;

pub mod authoring;
pub mod recorder;

pub use authoring::{
    add_question, create_questionnaire, delete_questionnaire, get_questionnaire,
    list_questionnaires,
};
pub use recorder::{list_responses, submit_responses};

/// Log a failed operation at a level matching its cause, then hand it back.
fn report(operation: &str, err: Error) -> Error {
    match &err {
        Error::Persistence(_) | Error::Internal(_) => error!("{operation} failed: {err}"),
        _ => warn!("{operation} rejected: {err}"),
    }
    err
}
