use std::sync::Arc;

use rocket::{
    serde::json::{Error as JsonError, Json},
    Route,
};

use crate::store::{SchemaStore, UserDirectory};

mod auth;
mod questionnaire;
mod response;

/// Managed handle on the schema store.
pub type Store = Arc<dyn SchemaStore>;

/// Managed handle on the account directory.
pub type Users = Arc<dyn UserDirectory>;

/// A JSON request body that may have failed to parse. Handlers turn the
/// failure into a validation error with `?`.
pub type Body<'r, T> = Result<Json<T>, JsonError<'r>>;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(questionnaire::routes());
    routes.extend(response::routes());
    routes.extend(auth::routes());
    routes
}
