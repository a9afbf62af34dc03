#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use config::Config;

use config::{manage_store, ConfigFairing, StoreFairing};
use logging::LoggerFairing;
use store::{SchemaStore, UserDirectory};

/// Routes and fairings common to every way of building the server.
fn base(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", error::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
}

/// Build the server, with the store chosen by configuration.
pub fn build() -> Rocket<Build> {
    base(rocket::build()).attach(StoreFairing)
}

/// Build the server around an existing store.
pub fn rocket_for_store<S>(figment: Figment, store: S) -> Rocket<Build>
where
    S: SchemaStore + UserDirectory + Clone + 'static,
{
    manage_store(base(rocket::custom(figment)), store)
}

/// Default configuration plus the settings tests rely on.
#[cfg(test)]
pub(crate) fn test_figment() -> Figment {
    rocket::Config::figment()
        .merge(("jwt_secret", "test secret, do not use in production"))
        .merge(("auth_ttl", 600))
        .merge(("require_auth", true))
}
