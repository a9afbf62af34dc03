use log::info;

use crate::error::{NotFound, Result};
use crate::model::{
    api::submission::{Submission, SubmissionReceipt},
    auth::Author,
    questionnaire::QuestionnaireId,
    response::{Answer, NewAnswerRecord, ResponseSet},
};
use crate::store::{self, SchemaStore};

use super::report;

/// Validate a submission against its questionnaire and record it.
///
/// Answers are handled in ascending question id. The first question or
/// option that fails to resolve aborts the whole submission, and neither
/// the response set nor any of its answers are kept.
pub async fn submit_responses(
    store: &dyn SchemaStore,
    submission: Submission,
) -> Result<SubmissionReceipt> {
    let (response_set, answers) = submission
        .into_parts()
        .map_err(|err| report("Submission", err.into()))?;
    let questionnaire_id = response_set.questionnaire_id;

    let receipt = store::transaction(store, move |tx| {
        Box::pin(async move {
            let questionnaire = tx
                .load_questionnaire(questionnaire_id)
                .await?
                .ok_or(NotFound::Questionnaire {
                    questionnaire: questionnaire_id,
                })?;
            let response_set_id = tx.insert_response_set(&response_set).await?;

            let mut count = 0;
            for (question_id, values) in answers {
                let question =
                    questionnaire
                        .question(question_id)
                        .ok_or(NotFound::Question {
                            questionnaire: questionnaire_id,
                            question: question_id,
                        })?;
                let answer = Answer::resolve(question, values)?;
                for payload in answer.into_payloads() {
                    let record = NewAnswerRecord {
                        response_set_id,
                        question_id,
                        payload,
                    };
                    tx.insert_answer(&record).await?;
                    count += 1;
                }
            }
            Ok(SubmissionReceipt::new(response_set_id, count))
        })
    })
    .await
    .map_err(|err| report("Submission", err))?;

    info!(
        "Recorded response set {} for questionnaire {questionnaire_id} with {} answers",
        receipt.id, receipt.count
    );
    Ok(receipt)
}

/// Every response set recorded against a questionnaire, with its answers.
pub async fn list_responses(
    store: &dyn SchemaStore,
    questionnaire_id: QuestionnaireId,
    author: &Author,
) -> Result<Vec<ResponseSet>> {
    let response_sets = store::read(store, move |tx| {
        Box::pin(async move {
            if tx.load_questionnaire(questionnaire_id).await?.is_none() {
                return Err(NotFound::Questionnaire {
                    questionnaire: questionnaire_id,
                }
                .into());
            }
            tx.load_response_sets(questionnaire_id).await
        })
    })
    .await?;

    info!(
        "{} listed {} responses to questionnaire {questionnaire_id}",
        author.username(),
        response_sets.len()
    );
    Ok(response_sets)
}
