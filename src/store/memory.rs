use std::collections::BTreeMap;
use std::sync::Arc;

use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, PersistenceError, Result};
use crate::model::{
    questionnaire::{
        NewQuestion, NewQuestionnaire, OptionId, Question, QuestionId, QuestionOption,
        QuestionType, Questionnaire, QuestionnaireId, QuestionnaireSummary,
    },
    response::{
        AnswerId, AnswerPayload, AnswerRecord, NewAnswerRecord, NewResponseSet, ResponseSet,
        ResponseSetId,
    },
    user::{NewUser, User, UserId},
};

use super::{SchemaStore, Transaction, UserDirectory};

/// A process-local store.
///
/// A transaction holds the table lock for its whole lifetime, so
/// transactions are serialized. Writes are applied in place and logged;
/// rolling back (or dropping the transaction) replays the log backwards.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

/// Number of rows per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub questionnaires: usize,
    pub questions: usize,
    pub options: usize,
    pub response_sets: usize,
    pub answers: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed row counts.
    pub async fn row_counts(&self) -> RowCounts {
        let tables = self.tables.lock().await;
        RowCounts {
            questionnaires: tables.questionnaires.len(),
            questions: tables.questions.len(),
            options: tables.options.len(),
            response_sets: tables.response_sets.len(),
            answers: tables.answers.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    questionnaires: BTreeMap<QuestionnaireId, NewQuestionnaire>,
    questions: BTreeMap<QuestionId, QuestionRow>,
    options: BTreeMap<OptionId, OptionRow>,
    response_sets: BTreeMap<ResponseSetId, NewResponseSet>,
    answers: BTreeMap<AnswerId, NewAnswerRecord>,
    users: BTreeMap<UserId, NewUser>,
    sequences: Sequences,
}

#[derive(Debug, Clone)]
struct QuestionRow {
    questionnaire_id: QuestionnaireId,
    position: u32,
    text: String,
    kind: QuestionType,
    response_limit: Option<u32>,
}

#[derive(Debug, Clone)]
struct OptionRow {
    question_id: QuestionId,
    position: u32,
    text: String,
}

/// Auto-increment counters, one per table. IDs start at 1.
#[derive(Debug, Clone, Copy, Default)]
struct Sequences {
    questionnaire: u32,
    question: u32,
    option: u32,
    response_set: u32,
    answer: u32,
    user: u32,
}

/// A row's state before a transaction touched it. `None` means the row did
/// not exist.
#[derive(Debug)]
enum Undo {
    Questionnaire(QuestionnaireId, Option<NewQuestionnaire>),
    Question(QuestionId, Option<QuestionRow>),
    Choice(OptionId, Option<OptionRow>),
    ResponseSet(ResponseSetId, Option<NewResponseSet>),
    Answer(AnswerId, Option<NewAnswerRecord>),
}

fn restore<V>(table: &mut BTreeMap<u32, V>, id: u32, previous: Option<V>) {
    match previous {
        Some(row) => {
            table.insert(id, row);
        }
        None => {
            table.remove(&id);
        }
    }
}

fn next(counter: &mut u32) -> u32 {
    *counter += 1;
    *counter
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

fn constraint(message: String) -> Error {
    PersistenceError::Constraint(message).into()
}

impl Tables {
    fn questions_of(&self, questionnaire: QuestionnaireId) -> Vec<(QuestionId, &QuestionRow)> {
        let mut questions: Vec<_> = self
            .questions
            .iter()
            .filter(|(_, row)| row.questionnaire_id == questionnaire)
            .map(|(id, row)| (*id, row))
            .collect();
        questions.sort_by_key(|(_, row)| row.position);
        questions
    }

    fn options_of(&self, question: QuestionId) -> Vec<QuestionOption> {
        let mut options: Vec<_> = self
            .options
            .iter()
            .filter(|(_, row)| row.question_id == question)
            .map(|(id, row)| QuestionOption {
                id: *id,
                question_id: question,
                position: row.position,
                text: row.text.clone(),
            })
            .collect();
        options.sort_by_key(|option| option.position);
        options
    }

    fn questionnaire(&self, id: QuestionnaireId) -> Option<Questionnaire> {
        let row = self.questionnaires.get(&id)?;
        let questions = self
            .questions_of(id)
            .into_iter()
            .map(|(question_id, question)| Question {
                id: question_id,
                questionnaire_id: id,
                position: question.position,
                text: question.text.clone(),
                kind: question.kind,
                response_limit: question.response_limit,
                options: self.options_of(question_id),
            })
            .collect();
        Some(Questionnaire {
            id,
            title: row.title.clone(),
            description: row.description.clone(),
            questions,
        })
    }

    /// Check that an answer points at rows that exist and agree with each
    /// other.
    fn check_answer(&self, answer: &NewAnswerRecord) -> Result<()> {
        let response_set = self
            .response_sets
            .get(&answer.response_set_id)
            .ok_or_else(|| missing("answer", 0, "response set", answer.response_set_id))?;
        let question = self
            .questions
            .get(&answer.question_id)
            .ok_or_else(|| missing("answer", 0, "question", answer.question_id))?;
        if question.questionnaire_id != response_set.questionnaire_id {
            return Err(constraint(format!(
                "question {} does not belong to questionnaire {}",
                answer.question_id, response_set.questionnaire_id
            )));
        }
        if let AnswerPayload::Option(option_id) = answer.payload {
            let option = self
                .options
                .get(&option_id)
                .ok_or_else(|| missing("answer", 0, "option", option_id))?;
            if option.question_id != answer.question_id {
                return Err(constraint(format!(
                    "option {option_id} does not belong to question {}",
                    answer.question_id
                )));
            }
        }
        Ok(())
    }
}

#[rocket::async_trait]
impl SchemaStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tables = self.tables.clone().lock_owned().await;
        let sequences = tables.sequences;
        Ok(Box::new(MemoryTransaction {
            tables,
            sequences,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

struct MemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    /// Counters as they were at `begin`.
    sequences: Sequences,
    undo: Vec<Undo>,
    committed: bool,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let tables = &mut *self.tables;
        for entry in self.undo.drain(..).rev() {
            match entry {
                Undo::Questionnaire(id, row) => restore(&mut tables.questionnaires, id, row),
                Undo::Question(id, row) => restore(&mut tables.questions, id, row),
                Undo::Choice(id, row) => restore(&mut tables.options, id, row),
                Undo::ResponseSet(id, row) => restore(&mut tables.response_sets, id, row),
                Undo::Answer(id, row) => restore(&mut tables.answers, id, row),
            }
        }
        tables.sequences = self.sequences;
    }
}

#[rocket::async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_questionnaire(
        &mut self,
        questionnaire: &NewQuestionnaire,
    ) -> Result<QuestionnaireId> {
        let id = next(&mut self.tables.sequences.questionnaire);
        self.tables
            .questionnaires
            .insert(id, questionnaire.clone());
        self.undo.push(Undo::Questionnaire(id, None));
        Ok(id)
    }

    async fn insert_question(
        &mut self,
        questionnaire: QuestionnaireId,
        position: u32,
        question: &NewQuestion,
    ) -> Result<QuestionId> {
        let tables = &mut *self.tables;
        if !tables.questionnaires.contains_key(&questionnaire) {
            return Err(missing("question", 0, "questionnaire", questionnaire));
        }
        if tables
            .questions
            .values()
            .any(|row| row.questionnaire_id == questionnaire && row.position == position)
        {
            return Err(constraint(format!(
                "questionnaire {questionnaire} already has a question at position {position}"
            )));
        }
        let id = next(&mut tables.sequences.question);
        tables.questions.insert(
            id,
            QuestionRow {
                questionnaire_id: questionnaire,
                position,
                text: question.text.clone(),
                kind: question.kind,
                response_limit: question.response_limit,
            },
        );
        self.undo.push(Undo::Question(id, None));
        Ok(id)
    }

    async fn insert_option(
        &mut self,
        question: QuestionId,
        position: u32,
        text: &str,
    ) -> Result<OptionId> {
        let tables = &mut *self.tables;
        if !tables.questions.contains_key(&question) {
            return Err(missing("option", 0, "question", question));
        }
        if tables
            .options
            .values()
            .any(|row| row.question_id == question && row.position == position)
        {
            return Err(constraint(format!(
                "question {question} already has an option at position {position}"
            )));
        }
        let id = next(&mut tables.sequences.option);
        tables.options.insert(
            id,
            OptionRow {
                question_id: question,
                position,
                text: text.to_string(),
            },
        );
        self.undo.push(Undo::Choice(id, None));
        Ok(id)
    }

    async fn load_questionnaire(&mut self, id: QuestionnaireId) -> Result<Option<Questionnaire>> {
        Ok(self.tables.questionnaire(id))
    }

    async fn list_questionnaires(&mut self) -> Result<Vec<QuestionnaireSummary>> {
        Ok(self
            .tables
            .questionnaires
            .iter()
            .map(|(id, row)| QuestionnaireSummary {
                id: *id,
                title: row.title.clone(),
                description: row.description.clone(),
            })
            .collect())
    }

    async fn delete_questionnaire(&mut self, id: QuestionnaireId) -> Result<bool> {
        let tables = &mut *self.tables;
        if !tables.questionnaires.contains_key(&id) {
            return Ok(false);
        }
        if tables
            .response_sets
            .values()
            .any(|row| row.questionnaire_id == id)
        {
            return Err(constraint(format!(
                "questionnaire {id} is referenced by response sets"
            )));
        }
        let question_ids: Vec<QuestionId> = tables
            .questions
            .iter()
            .filter(|(_, row)| row.questionnaire_id == id)
            .map(|(question_id, _)| *question_id)
            .collect();
        let option_ids: Vec<OptionId> = tables
            .options
            .iter()
            .filter(|(_, row)| question_ids.contains(&row.question_id))
            .map(|(option_id, _)| *option_id)
            .collect();
        for option_id in option_ids {
            let row = tables.options.remove(&option_id);
            self.undo.push(Undo::Choice(option_id, row));
        }
        for question_id in question_ids {
            let row = tables.questions.remove(&question_id);
            self.undo.push(Undo::Question(question_id, row));
        }
        let row = tables.questionnaires.remove(&id);
        self.undo.push(Undo::Questionnaire(id, row));
        Ok(true)
    }

    async fn insert_response_set(
        &mut self,
        response_set: &NewResponseSet,
    ) -> Result<ResponseSetId> {
        let tables = &mut *self.tables;
        if !tables
            .questionnaires
            .contains_key(&response_set.questionnaire_id)
        {
            return Err(missing(
                "response set",
                0,
                "questionnaire",
                response_set.questionnaire_id,
            ));
        }
        let id = next(&mut tables.sequences.response_set);
        tables.response_sets.insert(id, response_set.clone());
        self.undo.push(Undo::ResponseSet(id, None));
        Ok(id)
    }

    async fn insert_answer(&mut self, answer: &NewAnswerRecord) -> Result<AnswerId> {
        self.tables.check_answer(answer)?;
        let id = next(&mut self.tables.sequences.answer);
        self.tables.answers.insert(id, answer.clone());
        self.undo.push(Undo::Answer(id, None));
        Ok(id)
    }

    async fn count_response_sets(&mut self, questionnaire: QuestionnaireId) -> Result<u64> {
        Ok(self
            .tables
            .response_sets
            .values()
            .filter(|row| row.questionnaire_id == questionnaire)
            .count() as u64)
    }

    async fn load_response_sets(
        &mut self,
        questionnaire: QuestionnaireId,
    ) -> Result<Vec<ResponseSet>> {
        let tables = &*self.tables;
        Ok(tables
            .response_sets
            .iter()
            .filter(|(_, row)| row.questionnaire_id == questionnaire)
            .map(|(id, row)| ResponseSet {
                id: *id,
                questionnaire_id: questionnaire,
                name: row.name.clone(),
                email: row.email.clone(),
                answers: tables
                    .answers
                    .iter()
                    .filter(|(_, answer)| answer.response_set_id == *id)
                    .map(|(answer_id, answer)| AnswerRecord {
                        id: *answer_id,
                        response_set_id: *id,
                        question_id: answer.question_id,
                        payload: answer.payload.clone(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        Ok(())
    }

    /// Dropping undoes the writes.
    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[rocket::async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|(_, user)| user.username == username)
            .map(|(id, user)| User {
                id: *id,
                user: user.clone(),
            }))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|existing| existing.username == user.username)
        {
            return Err(Error::Conflict(format!(
                "Username already in use: {}",
                user.username
            )));
        }
        let id = next(&mut tables.sequences.user);
        tables.users.insert(id, user.clone());
        Ok(User { id, user })
    }
}
