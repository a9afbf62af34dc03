//! Durable storage for questionnaires, responses and accounts.
//!
//! All questionnaire and response access goes through a [`Transaction`]
//! obtained from a [`SchemaStore`]. Stores never commit on their own: the
//! caller decides, normally via [`transaction`], which commits when the body
//! succeeds and rolls back on every other exit path.

use log::error;
use rocket::futures::future::BoxFuture;

use crate::error::Result;
use crate::model::{
    questionnaire::{
        NewQuestion, NewQuestionnaire, OptionId, QuestionId, Questionnaire, QuestionnaireId,
        QuestionnaireSummary,
    },
    response::{AnswerId, NewAnswerRecord, NewResponseSet, ResponseSet, ResponseSetId},
    user::{NewUser, User},
};

mod memory;
mod mongo;

pub use memory::{MemoryStore, RowCounts};
pub use mongo::MongoStore;

/// A backend able to open transactional scopes.
#[rocket::async_trait]
pub trait SchemaStore: Send + Sync {
    /// Open a new transaction. Dropping it without committing discards every
    /// write made through it.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A single unit of work against a [`SchemaStore`].
///
/// Inserting a row whose parent does not exist, or whose position within its
/// parent is already taken, fails with a persistence error.
#[rocket::async_trait]
pub trait Transaction: Send {
    async fn insert_questionnaire(
        &mut self,
        questionnaire: &NewQuestionnaire,
    ) -> Result<QuestionnaireId>;

    async fn insert_question(
        &mut self,
        questionnaire: QuestionnaireId,
        position: u32,
        question: &NewQuestion,
    ) -> Result<QuestionId>;

    async fn insert_option(
        &mut self,
        question: QuestionId,
        position: u32,
        text: &str,
    ) -> Result<OptionId>;

    /// Load a questionnaire with its questions and options, both ordered by
    /// position.
    async fn load_questionnaire(&mut self, id: QuestionnaireId) -> Result<Option<Questionnaire>>;

    async fn list_questionnaires(&mut self) -> Result<Vec<QuestionnaireSummary>>;

    /// Delete a questionnaire together with its questions and options.
    /// Returns whether it existed.
    async fn delete_questionnaire(&mut self, id: QuestionnaireId) -> Result<bool>;

    async fn insert_response_set(&mut self, response_set: &NewResponseSet)
        -> Result<ResponseSetId>;

    async fn insert_answer(&mut self, answer: &NewAnswerRecord) -> Result<AnswerId>;

    async fn count_response_sets(&mut self, questionnaire: QuestionnaireId) -> Result<u64>;

    async fn load_response_sets(&mut self, questionnaire: QuestionnaireId)
        -> Result<Vec<ResponseSet>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Account lookups for the identity collaborator.
#[rocket::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Store a new account. Fails with a conflict if the username is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User>;
}

/// Run `body` inside a fresh transaction: commit if it succeeds, roll back
/// otherwise.
pub async fn transaction<T, F>(store: &dyn SchemaStore, body: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = store.begin().await?;
    let outcome = body(&mut *tx).await;
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!("Rollback failed after '{err}': {rollback_err}");
            }
            Err(err)
        }
    }
}

/// Read-only helper: run `body` in a transaction that is always rolled back.
pub async fn read<T, F>(store: &dyn SchemaStore, body: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = store.begin().await?;
    let outcome = body(&mut *tx).await;
    tx.rollback().await?;
    outcome
}
