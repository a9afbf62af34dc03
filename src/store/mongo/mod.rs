//! MongoDB backend. Requires a replica set, since every [`Transaction`] is
//! a multi-document transaction on a client session.

use std::collections::BTreeMap;

use log::info;
use mongodb::{
    bson::{doc, Document},
    options::FindOptions,
    Client, ClientSession, Database, SessionCursor,
};
use serde::de::DeserializeOwned;

use crate::error::{Error, PersistenceError, Result};
use crate::model::{
    questionnaire::{
        NewQuestion, NewQuestionnaire, OptionId, Question, QuestionId, QuestionOption,
        Questionnaire, QuestionnaireId, QuestionnaireSummary,
    },
    response::{
        AnswerId, AnswerPayload, AnswerRecord, NewAnswerRecord, NewResponseSet, ResponseSet,
        ResponseSetId,
    },
    user::{NewUser, User},
};

use super::{SchemaStore, Transaction, UserDirectory};

mod collection;
mod counter;
mod errors;

use collection::{
    ensure_indexes_exist, AnswerDoc, Coll, OptionDoc, QuestionDoc, QuestionnaireDoc,
    ResponseSetDoc,
};
use counter::{
    Counter, ANSWER_COUNTER, OPTION_COUNTER, QUESTIONNAIRE_COUNTER, QUESTION_COUNTER,
    RESPONSE_SET_COUNTER, USER_COUNTER,
};
use errors::{is_duplicate_key_error, write_error};

#[derive(Clone)]
struct Collections {
    questionnaires: Coll<QuestionnaireDoc>,
    questions: Coll<QuestionDoc>,
    options: Coll<OptionDoc>,
    response_sets: Coll<ResponseSetDoc>,
    answers: Coll<AnswerDoc>,
    users: Coll<User>,
    counters: Coll<Counter>,
}

impl Collections {
    fn from_db(db: &Database) -> Self {
        Self {
            questionnaires: Coll::from_db(db),
            questions: Coll::from_db(db),
            options: Coll::from_db(db),
            response_sets: Coll::from_db(db),
            answers: Coll::from_db(db),
            users: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    collections: Collections,
}

impl MongoStore {
    /// Connect to the given deployment and make sure indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        info!("Connected to MongoDB database '{db_name}'");
        Ok(Self {
            collections: Collections::from_db(&db),
            client,
        })
    }
}

#[rocket::async_trait]
impl SchemaStore for MongoStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(Box::new(MongoTransaction {
            session,
            collections: self.collections.clone(),
        }))
    }
}

/// Dropping an uncommitted session aborts its transaction server-side.
struct MongoTransaction {
    session: ClientSession,
    collections: Collections,
}

async fn collect<T>(mut cursor: SessionCursor<T>, session: &mut ClientSession) -> Result<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut items = Vec::new();
    while let Some(item) = cursor.next(session).await {
        items.push(item?);
    }
    Ok(items)
}

fn by_position() -> FindOptions {
    FindOptions::builder().sort(doc! {"position": 1}).build()
}

fn by_id() -> FindOptions {
    FindOptions::builder().sort(doc! {"_id": 1}).build()
}

fn missing(entity: &'static str, id: u32, parent: &'static str, parent_id: u32) -> Error {
    PersistenceError::ForeignKey {
        entity,
        id,
        parent,
        parent_id,
    }
    .into()
}

impl MongoTransaction {
    async fn questionnaire_doc(&mut self, id: QuestionnaireId) -> Result<Option<QuestionnaireDoc>> {
        Ok(self
            .collections
            .questionnaires
            .find_one_with_session(doc! {"_id": i64::from(id)}, None, &mut self.session)
            .await?)
    }

    /// Write to the questionnaire document, tying this transaction to it.
    /// Returns false if the questionnaire does not exist.
    async fn claim_questionnaire(&mut self, id: QuestionnaireId, update: Document) -> Result<bool> {
        let result = self
            .collections
            .questionnaires
            .update_one_with_session(doc! {"_id": i64::from(id)}, update, None, &mut self.session)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn question_doc(&mut self, id: QuestionId) -> Result<Option<QuestionDoc>> {
        Ok(self
            .collections
            .questions
            .find_one_with_session(doc! {"_id": i64::from(id)}, None, &mut self.session)
            .await?)
    }

    async fn question_docs(&mut self, questionnaire: QuestionnaireId) -> Result<Vec<QuestionDoc>> {
        let cursor = self
            .collections
            .questions
            .find_with_session(
                doc! {"questionnaire_id": i64::from(questionnaire)},
                by_position(),
                &mut self.session,
            )
            .await?;
        collect(cursor, &mut self.session).await
    }
}

#[rocket::async_trait]
impl Transaction for MongoTransaction {
    async fn insert_questionnaire(
        &mut self,
        questionnaire: &NewQuestionnaire,
    ) -> Result<QuestionnaireId> {
        let id = Counter::next(&self.collections.counters, QUESTIONNAIRE_COUNTER).await?;
        let document = QuestionnaireDoc {
            id,
            title: questionnaire.title.clone(),
            description: questionnaire.description.clone(),
            revision: 0,
            response_count: 0,
        };
        self.collections
            .questionnaires
            .insert_one_with_session(&document, None, &mut self.session)
            .await?;
        Ok(id)
    }

    async fn insert_question(
        &mut self,
        questionnaire: QuestionnaireId,
        position: u32,
        question: &NewQuestion,
    ) -> Result<QuestionId> {
        let claimed = self
            .claim_questionnaire(questionnaire, doc! {"$inc": {"revision": 1}})
            .await?;
        if !claimed {
            return Err(missing("question", 0, "questionnaire", questionnaire));
        }
        let id = Counter::next(&self.collections.counters, QUESTION_COUNTER).await?;
        let document = QuestionDoc {
            id,
            questionnaire_id: questionnaire,
            position,
            text: question.text.clone(),
            kind: question.kind,
            response_limit: question.response_limit,
        };
        self.collections
            .questions
            .insert_one_with_session(&document, None, &mut self.session)
            .await
            .map_err(|err| {
                write_error(err, || {
                    format!(
                        "questionnaire {questionnaire} already has a question at position {position}"
                    )
                })
            })?;
        Ok(id)
    }

    async fn insert_option(
        &mut self,
        question: QuestionId,
        position: u32,
        text: &str,
    ) -> Result<OptionId> {
        if self.question_doc(question).await?.is_none() {
            return Err(missing("option", 0, "question", question));
        }
        let id = Counter::next(&self.collections.counters, OPTION_COUNTER).await?;
        let document = OptionDoc {
            id,
            question_id: question,
            position,
            text: text.to_string(),
        };
        self.collections
            .options
            .insert_one_with_session(&document, None, &mut self.session)
            .await
            .map_err(|err| {
                write_error(err, || {
                    format!("question {question} already has an option at position {position}")
                })
            })?;
        Ok(id)
    }

    async fn load_questionnaire(&mut self, id: QuestionnaireId) -> Result<Option<Questionnaire>> {
        let questionnaire = match self.questionnaire_doc(id).await? {
            Some(questionnaire) => questionnaire,
            None => return Ok(None),
        };
        let question_docs = self.question_docs(id).await?;

        let question_ids: Vec<i64> = question_docs.iter().map(|q| i64::from(q.id)).collect();
        let cursor = self
            .collections
            .options
            .find_with_session(
                doc! {"question_id": {"$in": question_ids}},
                by_position(),
                &mut self.session,
            )
            .await?;
        let mut options: BTreeMap<QuestionId, Vec<QuestionOption>> = BTreeMap::new();
        for option in collect(cursor, &mut self.session).await? {
            options
                .entry(option.question_id)
                .or_default()
                .push(QuestionOption {
                    id: option.id,
                    question_id: option.question_id,
                    position: option.position,
                    text: option.text,
                });
        }

        let questions = question_docs
            .into_iter()
            .map(|question| Question {
                options: options.remove(&question.id).unwrap_or_default(),
                id: question.id,
                questionnaire_id: id,
                position: question.position,
                text: question.text,
                kind: question.kind,
                response_limit: question.response_limit,
            })
            .collect();
        Ok(Some(Questionnaire {
            id,
            title: questionnaire.title,
            description: questionnaire.description,
            questions,
        }))
    }

    async fn list_questionnaires(&mut self) -> Result<Vec<QuestionnaireSummary>> {
        let cursor = self
            .collections
            .questionnaires
            .find_with_session(doc! {}, by_id(), &mut self.session)
            .await?;
        Ok(collect(cursor, &mut self.session)
            .await?
            .into_iter()
            .map(|questionnaire| QuestionnaireSummary {
                id: questionnaire.id,
                title: questionnaire.title,
                description: questionnaire.description,
            })
            .collect())
    }

    async fn delete_questionnaire(&mut self, id: QuestionnaireId) -> Result<bool> {
        let questionnaire = match self.questionnaire_doc(id).await? {
            Some(questionnaire) => questionnaire,
            None => return Ok(false),
        };
        if questionnaire.response_count > 0 || self.count_response_sets(id).await? > 0 {
            return Err(PersistenceError::Constraint(format!(
                "questionnaire {id} is referenced by response sets"
            ))
            .into());
        }
        // Removing the questionnaire first surfaces a write conflict with a
        // concurrent submission before any child is touched.
        self.collections
            .questionnaires
            .delete_one_with_session(doc! {"_id": i64::from(id)}, None, &mut self.session)
            .await?;
        let question_ids: Vec<i64> = self
            .question_docs(id)
            .await?
            .iter()
            .map(|q| i64::from(q.id))
            .collect();
        self.collections
            .options
            .delete_many_with_session(
                doc! {"question_id": {"$in": question_ids}},
                None,
                &mut self.session,
            )
            .await?;
        self.collections
            .questions
            .delete_many_with_session(
                doc! {"questionnaire_id": i64::from(id)},
                None,
                &mut self.session,
            )
            .await?;
        Ok(true)
    }

    async fn insert_response_set(
        &mut self,
        response_set: &NewResponseSet,
    ) -> Result<ResponseSetId> {
        let questionnaire = response_set.questionnaire_id;
        let update = doc! {"$inc": {"revision": 1, "response_count": 1}};
        if !self.claim_questionnaire(questionnaire, update).await? {
            return Err(missing("response set", 0, "questionnaire", questionnaire));
        }
        let id = Counter::next(&self.collections.counters, RESPONSE_SET_COUNTER).await?;
        let document = ResponseSetDoc {
            id,
            questionnaire_id: questionnaire,
            name: response_set.name.clone(),
            email: response_set.email.clone(),
        };
        self.collections
            .response_sets
            .insert_one_with_session(&document, None, &mut self.session)
            .await?;
        Ok(id)
    }

    async fn insert_answer(&mut self, answer: &NewAnswerRecord) -> Result<AnswerId> {
        let response_set = self
            .collections
            .response_sets
            .find_one_with_session(
                doc! {"_id": i64::from(answer.response_set_id)},
                None,
                &mut self.session,
            )
            .await?
            .ok_or_else(|| missing("answer", 0, "response set", answer.response_set_id))?;
        let question = self
            .question_doc(answer.question_id)
            .await?
            .ok_or_else(|| missing("answer", 0, "question", answer.question_id))?;
        if question.questionnaire_id != response_set.questionnaire_id {
            return Err(PersistenceError::Constraint(format!(
                "question {} does not belong to questionnaire {}",
                question.id, response_set.questionnaire_id
            ))
            .into());
        }
        if let AnswerPayload::Option(option_id) = answer.payload {
            let option = self
                .collections
                .options
                .find_one_with_session(
                    doc! {"_id": i64::from(option_id)},
                    None,
                    &mut self.session,
                )
                .await?
                .ok_or_else(|| missing("answer", 0, "option", option_id))?;
            if option.question_id != question.id {
                return Err(PersistenceError::Constraint(format!(
                    "option {option_id} does not belong to question {}",
                    question.id
                ))
                .into());
            }
        }

        let id = Counter::next(&self.collections.counters, ANSWER_COUNTER).await?;
        let document = AnswerDoc {
            id,
            response_set_id: answer.response_set_id,
            question_id: answer.question_id,
            payload: answer.payload.clone(),
        };
        self.collections
            .answers
            .insert_one_with_session(&document, None, &mut self.session)
            .await?;
        Ok(id)
    }

    async fn count_response_sets(&mut self, questionnaire: QuestionnaireId) -> Result<u64> {
        Ok(self
            .collections
            .response_sets
            .count_documents_with_session(
                doc! {"questionnaire_id": i64::from(questionnaire)},
                None,
                &mut self.session,
            )
            .await?)
    }

    async fn load_response_sets(
        &mut self,
        questionnaire: QuestionnaireId,
    ) -> Result<Vec<ResponseSet>> {
        let cursor = self
            .collections
            .response_sets
            .find_with_session(
                doc! {"questionnaire_id": i64::from(questionnaire)},
                by_id(),
                &mut self.session,
            )
            .await?;
        let response_sets = collect(cursor, &mut self.session).await?;

        let ids: Vec<i64> = response_sets.iter().map(|r| i64::from(r.id)).collect();
        let cursor = self
            .collections
            .answers
            .find_with_session(
                doc! {"response_set_id": {"$in": ids}},
                by_id(),
                &mut self.session,
            )
            .await?;
        let mut answers: BTreeMap<ResponseSetId, Vec<AnswerRecord>> = BTreeMap::new();
        for answer in collect(cursor, &mut self.session).await? {
            answers
                .entry(answer.response_set_id)
                .or_default()
                .push(AnswerRecord {
                    id: answer.id,
                    response_set_id: answer.response_set_id,
                    question_id: answer.question_id,
                    payload: answer.payload,
                });
        }

        Ok(response_sets
            .into_iter()
            .map(|response_set| ResponseSet {
                answers: answers.remove(&response_set.id).unwrap_or_default(),
                id: response_set.id,
                questionnaire_id: questionnaire,
                name: response_set.name,
                email: response_set.email,
            })
            .collect())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        Ok(self.session.commit_transaction().await?)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        Ok(self.session.abort_transaction().await?)
    }
}

#[rocket::async_trait]
impl UserDirectory for MongoStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .collections
            .users
            .find_one(doc! {"username": username}, None)
            .await?)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let id = Counter::next(&self.collections.counters, USER_COUNTER).await?;
        let user = User { id, user };
        match self.collections.users.insert_one(&user, None).await {
            Ok(_) => Ok(user),
            Err(err) if is_duplicate_key_error(&err) => Err(Error::Conflict(format!(
                "Username already in use: {}",
                user.username
            ))),
            Err(err) => Err(err.into()),
        }
    }
}

/// These run against the deployment named by `DB_URI`, which must be a
/// replica set, and are skipped when it is unset. Each test gets its own
/// database, dropped afterwards whether or not the test passed.
#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe};

    use rocket::futures::FutureExt;

    use super::*;
    use crate::model::{
        api::{authoring::QuestionnaireSpec, submission::Submission},
        auth::Author,
        questionnaire::QuestionType,
    };
    use crate::service::{
        self,
        testing::{FailOn, FailingStore},
    };

    async fn with_store<F, Fut>(test: F)
    where
        F: FnOnce(MongoStore) -> Fut,
        Fut: Future<Output = ()>,
    {
        let uri = match std::env::var("DB_URI") {
            Ok(uri) => uri,
            Err(_) => {
                eprintln!("DB_URI not set, skipping MongoDB test");
                return;
            }
        };
        let db_name = format!("pesquisa_test_{}", rand::random::<u32>());
        let store = MongoStore::connect(&uri, &db_name).await.unwrap();
        let db = store.client.database(&db_name);

        let result = AssertUnwindSafe(test(store)).catch_unwind().await;
        db.drop(None).await.unwrap();
        if let Err(cause) = result {
            std::panic::resume_unwind(cause);
        }
    }

    async fn count<T>(collection: &Coll<T>) -> u64 {
        collection.count_documents(doc! {}, None).await.unwrap()
    }

    fn new_questionnaire() -> NewQuestionnaire {
        NewQuestionnaire {
            title: "T".to_string(),
            description: None,
        }
    }

    fn new_question(kind: QuestionType) -> NewQuestion {
        NewQuestion {
            text: "Q".to_string(),
            kind,
            response_limit: None,
            options: Vec::new(),
        }
    }

    fn new_response_set(questionnaire: QuestionnaireId) -> NewResponseSet {
        NewResponseSet {
            questionnaire_id: questionnaire,
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        }
    }

    async fn seed(store: &MongoStore) -> (QuestionnaireId, QuestionId, OptionId) {
        let mut tx = store.begin().await.unwrap();
        let questionnaire = tx.insert_questionnaire(&new_questionnaire()).await.unwrap();
        let question = tx
            .insert_question(questionnaire, 0, &new_question(QuestionType::SelectSingle))
            .await
            .unwrap();
        let option = tx.insert_option(question, 0, "A").await.unwrap();
        tx.commit().await.unwrap();
        (questionnaire, question, option)
    }

    #[rocket::async_test]
    async fn committed_graph_loads_in_order() {
        with_store(|store| async move {
            let mut tx = store.begin().await.unwrap();
            let id = tx.insert_questionnaire(&new_questionnaire()).await.unwrap();
            let second = tx
                .insert_question(id, 1, &new_question(QuestionType::SelectMultiple))
                .await
                .unwrap();
            let first = tx
                .insert_question(id, 0, &new_question(QuestionType::Text))
                .await
                .unwrap();
            tx.insert_option(second, 1, "y").await.unwrap();
            tx.insert_option(second, 0, "x").await.unwrap();
            tx.commit().await.unwrap();

            let mut tx = store.begin().await.unwrap();
            let loaded = tx.load_questionnaire(id).await.unwrap().unwrap();
            let ids: Vec<_> = loaded.questions.iter().map(|q| q.id).collect();
            assert_eq!(ids, vec![first, second]);
            let texts: Vec<_> = loaded.questions[1]
                .options
                .iter()
                .map(|o| o.text.as_str())
                .collect();
            assert_eq!(texts, vec!["x", "y"]);
            assert!(tx.load_questionnaire(id + 1).await.unwrap().is_none());
            tx.rollback().await.unwrap();
        })
        .await;
    }

    #[rocket::async_test]
    async fn rolled_back_writes_are_discarded() {
        with_store(|store| async move {
            let mut tx = store.begin().await.unwrap();
            tx.insert_questionnaire(&new_questionnaire()).await.unwrap();
            tx.rollback().await.unwrap();
            assert_eq!(count(&store.collections.questionnaires).await, 0);
        })
        .await;
    }

    #[rocket::async_test]
    async fn referential_integrity_is_enforced() {
        with_store(|store| async move {
            let (questionnaire, question, option) = seed(&store).await;

            let mut tx = store.begin().await.unwrap();
            let err = tx
                .insert_question(questionnaire + 1, 0, &new_question(QuestionType::Text))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Persistence(PersistenceError::ForeignKey { .. })
            ));
            assert!(tx.insert_option(question + 1, 0, "x").await.is_err());
            tx.rollback().await.unwrap();

            // A failed write aborts the server-side transaction, so each
            // check gets a fresh one.
            let mut tx = store.begin().await.unwrap();
            let err = tx
                .insert_question(questionnaire, 0, &new_question(QuestionType::Text))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Persistence(PersistenceError::Constraint(_))
            ));
            let _ = tx.rollback().await;

            let mut tx = store.begin().await.unwrap();
            let response_set = tx
                .insert_response_set(&new_response_set(questionnaire))
                .await
                .unwrap();
            assert!(tx
                .insert_answer(&NewAnswerRecord {
                    response_set_id: response_set,
                    question_id: question,
                    payload: AnswerPayload::Option(option + 1),
                })
                .await
                .is_err());
            tx.insert_answer(&NewAnswerRecord {
                response_set_id: response_set,
                question_id: question,
                payload: AnswerPayload::Option(option),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();

            let mut tx = store.begin().await.unwrap();
            assert!(tx.delete_questionnaire(questionnaire).await.is_err());
            let _ = tx.rollback().await;
            assert_eq!(count(&store.collections.questionnaires).await, 1);
        })
        .await;
    }

    #[rocket::async_test]
    async fn delete_cascades_to_questions_and_options() {
        with_store(|store| async move {
            let (questionnaire, _, _) = seed(&store).await;

            let mut tx = store.begin().await.unwrap();
            assert!(tx.delete_questionnaire(questionnaire).await.unwrap());
            assert!(!tx.delete_questionnaire(questionnaire).await.unwrap());
            tx.commit().await.unwrap();

            assert_eq!(count(&store.collections.questionnaires).await, 0);
            assert_eq!(count(&store.collections.questions).await, 0);
            assert_eq!(count(&store.collections.options).await, 0);
        })
        .await;
    }

    #[rocket::async_test]
    async fn delete_conflicts_with_concurrent_submission() {
        with_store(|store| async move {
            let (questionnaire, _, _) = seed(&store).await;

            let mut submitting = store.begin().await.unwrap();
            submitting
                .insert_response_set(&new_response_set(questionnaire))
                .await
                .unwrap();

            let mut deleting = store.begin().await.unwrap();
            assert!(deleting.delete_questionnaire(questionnaire).await.is_err());
            let _ = deleting.rollback().await;

            submitting.commit().await.unwrap();

            let mut tx = store.begin().await.unwrap();
            assert!(tx.load_questionnaire(questionnaire).await.unwrap().is_some());
            assert_eq!(tx.count_response_sets(questionnaire).await.unwrap(), 1);
            tx.rollback().await.unwrap();
        })
        .await;
    }

    #[rocket::async_test]
    async fn failed_operations_leave_no_rows() {
        with_store(|store| async move {
            let failing = FailingStore {
                inner: store.clone(),
                fail_on: FailOn::Option,
            };
            let err = service::create_questionnaire(
                &failing,
                QuestionnaireSpec::satisfaction(),
                &Author(None),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::Persistence(_)));
            assert_eq!(count(&store.collections.questionnaires).await, 0);
            assert_eq!(count(&store.collections.questions).await, 0);

            let questionnaire = service::create_questionnaire(
                &store,
                QuestionnaireSpec::satisfaction(),
                &Author(None),
            )
            .await
            .unwrap();
            let failing = FailingStore {
                inner: store.clone(),
                fail_on: FailOn::Answer,
            };
            let submission = Submission {
                questionario_id: questionnaire.id,
                nome: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                respostas: BTreeMap::from([(
                    questionnaire.questions[0].id,
                    vec!["great".to_string()],
                )]),
            };
            let err = service::submit_responses(&failing, submission)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Persistence(_)));
            assert_eq!(count(&store.collections.response_sets).await, 0);
            assert_eq!(count(&store.collections.answers).await, 0);
        })
        .await;
    }

    #[rocket::async_test]
    async fn usernames_are_unique() {
        with_store(|store| async move {
            let user = NewUser {
                username: "ana".to_string(),
                email: "ana@example.com".to_string(),
                full_name: "Ana".to_string(),
                password_hash: "hash".to_string(),
                is_active: true,
                is_superuser: false,
            };
            let inserted = store.insert_user(user.clone()).await.unwrap();
            assert!(matches!(
                store.insert_user(user).await,
                Err(Error::Conflict(_))
            ));
            let found = store.find_user_by_username("ana").await.unwrap().unwrap();
            assert_eq!(found, inserted);
            assert!(store.find_user_by_username("bob").await.unwrap().is_none());
        })
        .await;
    }
}
