use log::info;

use crate::error::{Error, Issue, NotFound, Result, ValidationError};
use crate::model::{
    api::authoring::{QuestionSpec, QuestionnaireSpec},
    auth::Author,
    questionnaire::{NewQuestion, Question, Questionnaire, QuestionnaireId, QuestionnaireSummary},
};
use crate::store::{self, SchemaStore, Transaction};

use super::report;

/// Write a validated question and its options, returning it with the
/// generated identities.
async fn write_question(
    tx: &mut dyn Transaction,
    questionnaire: QuestionnaireId,
    position: u32,
    question: NewQuestion,
) -> Result<Question> {
    let id = tx.insert_question(questionnaire, position, &question).await?;
    let mut option_ids = Vec::with_capacity(question.options.len());
    for (option_position, text) in (0..).zip(&question.options) {
        option_ids.push(tx.insert_option(id, option_position, text).await?);
    }
    Ok(question.into_question(id, questionnaire, position, option_ids))
}

/// Validate and persist a questionnaire with all of its questions and
/// options in a single transaction.
///
/// Nothing is written unless the whole request is valid, and nothing is
/// visible unless every write succeeds.
pub async fn create_questionnaire(
    store: &dyn SchemaStore,
    spec: QuestionnaireSpec,
    author: &Author,
) -> Result<Questionnaire> {
    let (questionnaire, questions) = spec
        .validate()
        .map_err(|err| report("Questionnaire creation", err.into()))?;

    let created = store::transaction(store, move |tx| {
        Box::pin(async move {
            let id = tx.insert_questionnaire(&questionnaire).await?;
            let mut persisted = Vec::with_capacity(questions.len());
            for (position, question) in (0..).zip(questions) {
                persisted.push(write_question(tx, id, position, question).await?);
            }
            Ok(Questionnaire {
                id,
                title: questionnaire.title,
                description: questionnaire.description,
                questions: persisted,
            })
        })
    })
    .await
    .map_err(|err| report("Questionnaire creation", err))?;

    info!(
        "{} created questionnaire {} with {} questions",
        author.username(),
        created.id,
        created.questions.len()
    );
    Ok(created)
}

/// Append a question to an existing questionnaire.
pub async fn add_question(
    store: &dyn SchemaStore,
    questionnaire_id: QuestionnaireId,
    spec: QuestionSpec,
    author: &Author,
) -> Result<Question> {
    let question = spec.validate().map_err(|reasons| {
        let issues = reasons.into_iter().map(Issue::general).collect();
        report("Question creation", ValidationError { issues }.into())
    })?;

    let created = store::transaction(store, move |tx| {
        Box::pin(async move {
            let questionnaire = tx
                .load_questionnaire(questionnaire_id)
                .await?
                .ok_or(NotFound::Questionnaire {
                    questionnaire: questionnaire_id,
                })?;
            let position = questionnaire
                .questions
                .last()
                .map_or(0, |last| last.position + 1);
            write_question(tx, questionnaire_id, position, question).await
        })
    })
    .await
    .map_err(|err| report("Question creation", err))?;

    info!(
        "{} added question {} to questionnaire {questionnaire_id}",
        author.username(),
        created.id
    );
    Ok(created)
}

/// A questionnaire with its full schema.
pub async fn get_questionnaire(
    store: &dyn SchemaStore,
    questionnaire_id: QuestionnaireId,
) -> Result<Questionnaire> {
    store::read(store, move |tx| {
        Box::pin(async move {
            let questionnaire = tx.load_questionnaire(questionnaire_id).await?;
            Ok(questionnaire.ok_or(NotFound::Questionnaire {
                questionnaire: questionnaire_id,
            })?)
        })
    })
    .await
}

pub async fn list_questionnaires(store: &dyn SchemaStore) -> Result<Vec<QuestionnaireSummary>> {
    store::read(store, |tx| Box::pin(async move { tx.list_questionnaires().await })).await
}

/// Delete a questionnaire along with its questions and options. Refused
/// once anyone has responded to it.
pub async fn delete_questionnaire(
    store: &dyn SchemaStore,
    questionnaire_id: QuestionnaireId,
    author: &Author,
) -> Result<()> {
    store::transaction(store, move |tx| {
        Box::pin(async move {
            let responses = tx.count_response_sets(questionnaire_id).await?;
            if responses > 0 {
                return Err(Error::Conflict(format!(
                    "Questionnaire {questionnaire_id} already has {responses} responses"
                )));
            }
            if !tx.delete_questionnaire(questionnaire_id).await? {
                return Err(NotFound::Questionnaire {
                    questionnaire: questionnaire_id,
                }
                .into());
            }
            Ok(())
        })
    })
    .await
    .map_err(|err| report("Questionnaire deletion", err))?;

    info!(
        "{} deleted questionnaire {questionnaire_id}",
        author.username()
    );
    Ok(())
}
