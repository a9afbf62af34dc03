//! Domain types.
//!
//! - [`questionnaire`] and [`response`] hold the stored entities.
//! - [`api`] holds request/response bodies in their wire format.
//! - [`user`] and [`auth`] cover operator accounts and credentials.

pub mod api;
pub mod auth;
pub mod questionnaire;
pub mod response;
pub mod user;
