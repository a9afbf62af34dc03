use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::submission::{Submission, SubmissionReceipt},
        auth::Author,
        questionnaire::QuestionnaireId,
        response::ResponseSet,
    },
    service,
};

use super::{Body, Store};

pub fn routes() -> Vec<Route> {
    routes![submit, list_responses]
}

/// Record a respondent's answers. Always public.
#[post("/responses", data = "<submission>", format = "json")]
async fn submit(
    submission: Body<'_, Submission>,
    store: &State<Store>,
) -> Result<(Status, Json<SubmissionReceipt>)> {
    let submission = submission?.into_inner();
    let receipt = service::submit_responses(store.inner().as_ref(), submission).await?;
    Ok((Status::Created, Json(receipt)))
}

#[get("/questionnaires/<questionnaire_id>/responses")]
async fn list_responses(
    author: Author,
    questionnaire_id: QuestionnaireId,
    store: &State<Store>,
) -> Result<Json<Vec<ResponseSet>>> {
    let responses =
        service::list_responses(store.inner().as_ref(), questionnaire_id, &author).await?;
    Ok(Json(responses))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rocket::{
        http::ContentType,
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json::json, Value},
    };

    use super::*;

    use crate::model::{
        api::authoring::QuestionnaireSpec, questionnaire::Questionnaire,
        response::AnswerPayload,
    };
    use crate::store::MemoryStore;

    async fn create(store: &MemoryStore, spec: QuestionnaireSpec) -> Questionnaire {
        service::create_questionnaire(store, spec, &Author(None))
            .await
            .unwrap()
    }

    async fn submit_answers<'c>(
        client: &'c Client,
        questionnaire: &Questionnaire,
        respostas: BTreeMap<u32, Vec<String>>,
    ) -> LocalResponse<'c> {
        let submission = Submission {
            questionario_id: questionnaire.id,
            nome: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            respostas,
        };
        client
            .post(uri!(submit))
            .header(ContentType::JSON)
            .body(json!(submission).to_string())
            .dispatch()
            .await
    }

    #[backend_test]
    async fn satisfaction_submission_is_recorded(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::satisfaction()).await;
        let comments = questionnaire.questions[0].id;
        let pick_one = &questionnaire.questions[1];
        let option_b = pick_one.options[1].id;

        let respostas = BTreeMap::from([
            (comments, vec!["great".to_string()]),
            (pick_one.id, vec![option_b.to_string()]),
        ]);
        let response = submit_answers(&client, &questionnaire, respostas).await;
        assert_eq!(Status::Created, response.status());
        let receipt: SubmissionReceipt = response.into_json().await.unwrap();
        assert_eq!(receipt.message, "ok");
        assert_eq!(receipt.count, 2);

        let stored = service::list_responses(&store, questionnaire.id, &Author(None))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        let payloads: Vec<_> = stored[0].answers.iter().map(|a| &a.payload).collect();
        assert_eq!(
            payloads,
            vec![
                &AnswerPayload::Text("great".to_string()),
                &AnswerPayload::Option(option_b)
            ]
        );
    }

    #[backend_test]
    async fn over_limit_is_bad_request(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::toppings()).await;
        let toppings = &questionnaire.questions[0];
        let all: Vec<String> = toppings.options.iter().map(|o| o.id.to_string()).collect();

        let response =
            submit_answers(&client, &questionnaire, BTreeMap::from([(toppings.id, all)])).await;
        assert_eq!(Status::BadRequest, response.status());
        let error: Value = response.into_json().await.unwrap();
        assert_eq!(error["issues"][0]["question"], toppings.id);
        assert_eq!(error["issues"][0]["reason"]["code"], "too_many_selections");
        assert_eq!(error["issues"][0]["reason"]["limit"], 2);

        assert_eq!(store.row_counts().await.answers, 0);
    }

    #[backend_test]
    async fn unknown_references_are_not_found(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::satisfaction()).await;
        let pick_one = questionnaire.questions[1].id;

        // Unknown option.
        let respostas = BTreeMap::from([(pick_one, vec!["9999".to_string()])]);
        let response = submit_answers(&client, &questionnaire, respostas).await;
        assert_eq!(Status::NotFound, response.status());
        let error: Value = response.into_json().await.unwrap();
        assert_eq!(error["missing"]["entity"], "option");

        // Unknown question.
        let respostas = BTreeMap::from([(9999, vec!["x".to_string()])]);
        let response = submit_answers(&client, &questionnaire, respostas).await;
        assert_eq!(Status::NotFound, response.status());

        // Unknown questionnaire.
        let mut missing = questionnaire.clone();
        missing.id += 100;
        let response = submit_answers(&client, &missing, BTreeMap::new()).await;
        assert_eq!(Status::NotFound, response.status());

        assert_eq!(store.row_counts().await.response_sets, 0);
    }

    #[backend_test]
    async fn non_numeric_question_key_is_validation_error(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::satisfaction()).await;
        let body = json!({
            "questionario_id": questionnaire.id,
            "nome": "Ana",
            "email": "ana@example.com",
            "respostas": {"first": ["great"]},
        });
        let response = client
            .post(uri!(submit))
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        assert_eq!(Some(ContentType::JSON), response.content_type());
        let error: Value = response.into_json().await.unwrap();
        assert_eq!(error["issues"][0]["reason"]["code"], "malformed_body");

        assert_eq!(store.row_counts().await.response_sets, 0);
    }

    #[backend_test]
    async fn listing_responses_requires_login(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::satisfaction()).await;
        let response = client
            .get(uri!(list_responses(questionnaire.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn listing_responses_as_operator(client: Client, store: MemoryStore) {
        let questionnaire = create(&store, QuestionnaireSpec::satisfaction()).await;
        let comments = questionnaire.questions[0].id;
        let respostas = BTreeMap::from([(comments, vec!["great".to_string()])]);
        submit_answers(&client, &questionnaire, respostas).await;

        let response = client
            .get(uri!(list_responses(questionnaire.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body[0]["nome"], "Ana");
        assert_eq!(body[0]["respostas"][0]["resposta_texto"], "great");
        assert_eq!(body[0]["respostas"][0]["questao_id"], comments);
    }
}
