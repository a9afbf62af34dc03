use std::sync::Arc;

use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, GuardFailure, Result};
use crate::model::user::{User, UserId};
use crate::store::UserDirectory;

use super::token::{AuthToken, AUTH_TOKEN_COOKIE};

/// An authenticated, active account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: UserId,
    pub username: String,
    pub is_superuser: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            is_superuser: user.is_superuser,
        }
    }
}

/// Turns a bearer credential into a [`Principal`].
#[rocket::async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, bearer: &str) -> Result<Principal>;
}

/// Resolves signed JWTs against the account directory.
pub struct JwtResolver<'a> {
    config: &'a Config,
    users: &'a dyn UserDirectory,
}

impl<'a> JwtResolver<'a> {
    pub fn new(config: &'a Config, users: &'a dyn UserDirectory) -> Self {
        Self { config, users }
    }
}

#[rocket::async_trait]
impl PrincipalResolver for JwtResolver<'_> {
    async fn resolve(&self, bearer: &str) -> Result<Principal> {
        let token = AuthToken::decode(bearer, self.config)?;
        let user = self
            .users
            .find_user_by_username(&token.username)
            .await?
            .ok_or_else(|| Error::Unauthorized("Could not validate credentials".to_string()))?;
        if !user.is_active {
            return Err(Error::Unauthorized("Inactive user".to_string()));
        }
        Ok(Principal::from(&user))
    }
}

/// The principal behind an operator request, if any.
///
/// Resolves the `Authorization: Bearer` header, falling back to the auth
/// cookie. When `require_auth` is off, anonymous requests succeed with
/// `Author(None)`; a credential that is present must still be valid.
#[derive(Debug)]
pub struct Author(pub Option<Principal>);

impl Author {
    pub fn username(&self) -> &str {
        self.0
            .as_ref()
            .map(|principal| principal.username.as_str())
            .unwrap_or("anonymous")
    }
}

fn credential(req: &Request<'_>) -> Option<String> {
    req.headers()
        .get_one("Authorization")
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .or_else(|| {
            req.cookies()
                .get(AUTH_TOKEN_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
}

/// Refuse the request, leaving the reason for the catcher.
fn refuse(req: &Request<'_>, status: Status, err: Error) -> Outcome<Author, Error> {
    req.local_cache(|| GuardFailure(Some(err.to_string())));
    Outcome::Failure((status, err))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Author {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let rocket = req.rocket();
        let (config, users) = match (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn UserDirectory>>(),
        ) {
            (Some(config), Some(users)) => (config, users),
            _ => {
                return refuse(
                    req,
                    Status::InternalServerError,
                    Error::Internal("Identity services are not configured".to_string()),
                )
            }
        };

        match credential(req) {
            None if config.require_auth() => refuse(
                req,
                Status::Unauthorized,
                Error::Unauthorized("Missing credentials".to_string()),
            ),
            None => Outcome::Success(Author(None)),
            Some(raw) => match JwtResolver::new(config, users.as_ref()).resolve(&raw).await {
                Ok(principal) => Outcome::Success(Author(Some(principal))),
                Err(err) => refuse(req, Status::Unauthorized, err),
            },
        }
    }
}
