use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use crate::model::{
    questionnaire::{OptionId, QuestionId, QuestionType, QuestionnaireId},
    response::{AnswerId, AnswerPayload, ResponseSetId},
    user::User,
};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireDoc {
    #[serde(rename = "_id")]
    pub id: QuestionnaireId,
    pub title: String,
    pub description: Option<String>,
    /// Bumped by every transaction that attaches questions or responses, so
    /// a concurrent delete of the same questionnaire hits a write conflict.
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub response_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDoc {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    pub questionnaire_id: QuestionnaireId,
    pub position: u32,
    pub text: String,
    pub kind: QuestionType,
    pub response_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDoc {
    #[serde(rename = "_id")]
    pub id: OptionId,
    pub question_id: QuestionId,
    pub position: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSetDoc {
    #[serde(rename = "_id")]
    pub id: ResponseSetId,
    pub questionnaire_id: QuestionnaireId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerDoc {
    #[serde(rename = "_id")]
    pub id: AnswerId,
    pub response_set_id: ResponseSetId,
    pub question_id: QuestionId,
    #[serde(flatten)]
    pub payload: AnswerPayload,
}

impl MongoCollection for QuestionnaireDoc {
    const NAME: &'static str = "questionnaires";
}

impl MongoCollection for QuestionDoc {
    const NAME: &'static str = "questions";
}

impl MongoCollection for OptionDoc {
    const NAME: &'static str = "options";
}

impl MongoCollection for ResponseSetDoc {
    const NAME: &'static str = "response_sets";
}

impl MongoCollection for AnswerDoc {
    const NAME: &'static str = "answers";
}

impl MongoCollection for User {
    const NAME: &'static str = "users";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Question positions are unique within a questionnaire.
    let question_index = IndexModel::builder()
        .keys(doc! {"questionnaire_id": 1, "position": 1})
        .options(unique.clone())
        .build();
    Coll::<QuestionDoc>::from_db(db)
        .create_index(question_index, None)
        .await?;

    // Option positions are unique within a question.
    let option_index = IndexModel::builder()
        .keys(doc! {"question_id": 1, "position": 1})
        .options(unique.clone())
        .build();
    Coll::<OptionDoc>::from_db(db)
        .create_index(option_index, None)
        .await?;

    let answer_index = IndexModel::builder()
        .keys(doc! {"response_set_id": 1})
        .build();
    Coll::<AnswerDoc>::from_db(db)
        .create_index(answer_index, None)
        .await?;

    let user_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique)
        .build();
    Coll::<User>::from_db(db)
        .create_index(user_index, None)
        .await?;

    Ok(())
}
