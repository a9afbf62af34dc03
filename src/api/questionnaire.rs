use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::authoring::{QuestionSpec, QuestionnaireSpec},
        auth::Author,
        questionnaire::{Question, Questionnaire, QuestionnaireId, QuestionnaireSummary},
    },
    service,
};

use super::{Body, Store};

pub fn routes() -> Vec<Route> {
    routes![
        create_questionnaire,
        list_questionnaires,
        get_questionnaire,
        add_question,
        delete_questionnaire,
    ]
}

#[post("/questionnaires", data = "<spec>", format = "json")]
async fn create_questionnaire(
    author: Author,
    spec: Body<'_, QuestionnaireSpec>,
    store: &State<Store>,
) -> Result<(Status, Json<Questionnaire>)> {
    let spec = spec?.into_inner();
    let questionnaire = service::create_questionnaire(store.inner().as_ref(), spec, &author).await?;
    Ok((Status::Created, Json(questionnaire)))
}

#[get("/questionnaires")]
async fn list_questionnaires(store: &State<Store>) -> Result<Json<Vec<QuestionnaireSummary>>> {
    let questionnaires = service::list_questionnaires(store.inner().as_ref()).await?;
    Ok(Json(questionnaires))
}

#[get("/questionnaires/<questionnaire_id>")]
async fn get_questionnaire(
    questionnaire_id: QuestionnaireId,
    store: &State<Store>,
) -> Result<Json<Questionnaire>> {
    let questionnaire = service::get_questionnaire(store.inner().as_ref(), questionnaire_id).await?;
    Ok(Json(questionnaire))
}

#[post(
    "/questionnaires/<questionnaire_id>/questions",
    data = "<spec>",
    format = "json"
)]
async fn add_question(
    author: Author,
    questionnaire_id: QuestionnaireId,
    spec: Body<'_, QuestionSpec>,
    store: &State<Store>,
) -> Result<(Status, Json<Question>)> {
    let spec = spec?.into_inner();
    let question =
        service::add_question(store.inner().as_ref(), questionnaire_id, spec, &author).await?;
    Ok((Status::Created, Json(question)))
}

#[delete("/questionnaires/<questionnaire_id>")]
async fn delete_questionnaire(
    author: Author,
    questionnaire_id: QuestionnaireId,
    store: &State<Store>,
) -> Result<Status> {
    service::delete_questionnaire(store.inner().as_ref(), questionnaire_id, &author).await?;
    Ok(Status::NoContent)
}
