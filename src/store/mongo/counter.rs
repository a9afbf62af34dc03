use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

use super::Coll;

pub const QUESTIONNAIRE_COUNTER: &str = "questionnaires";
pub const QUESTION_COUNTER: &str = "questions";
pub const OPTION_COUNTER: &str = "options";
pub const RESPONSE_SET_COUNTER: &str = "response_sets";
pub const ANSWER_COUNTER: &str = "answers";
pub const USER_COUNTER: &str = "users";

/// A counter document used to implement auto-increment IDs, one per
/// collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u32,
}

impl Counter {
    /// Atomically allocate the next value of the named counter, creating it
    /// on first use. The first value handed out is 1.
    ///
    /// Runs outside any session, so values allocated by an aborted
    /// transaction are not reused.
    pub async fn next(counters: &Coll<Counter>, name: &str) -> Result<u32> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": name }, update, options)
            .await?
            .ok_or_else(|| {
                PersistenceError::Constraint(format!("Failed to allocate from counter '{name}'"))
            })?;
        Ok(counter.next)
    }
}
