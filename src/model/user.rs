use std::ops::Deref;

use argon2::Config;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Issue, Reason, Result};

pub type UserId = u32;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Core account data, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl UserCore {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> Result<bool> {
        Ok(argon2::verify_encoded(
            &self.password_hash,
            password.as_ref(),
        )?)
    }
}

/// An account without an ID.
pub type NewUser = UserCore;

/// An account from storage, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

/// Raw login credentials. Never stored, since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to provision an account.
#[derive(Clone, Deserialize, Serialize)]
pub struct AccountRequest {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub is_superuser: bool,
}

impl TryFrom<AccountRequest> for NewUser {
    type Error = Error;

    /// Hash the password. Enforces a non-empty username and the minimum
    /// password length.
    fn try_from(request: AccountRequest) -> Result<Self> {
        let Credentials { username, password } = request.credentials;
        if username.trim().is_empty() {
            return Err(Error::invalid(Issue::general(Reason::EmptyUsername)));
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::invalid(Issue::general(Reason::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            })));
        }

        // 16 bytes is the recommended salt length for argon2.
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash = argon2::hash_encoded(password.as_bytes(), &salt, &Config::default())?;
        Ok(Self {
            username: username.trim().to_string(),
            email: request.email,
            full_name: request.full_name,
            password_hash,
            is_active: true,
            is_superuser: request.is_superuser,
        })
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl Credentials {
        pub fn example() -> Self {
            Self {
                username: "coordinator".into(),
                password: "pesquisa4lyfe".into(),
            }
        }
    }

    impl AccountRequest {
        pub fn example() -> Self {
            Self {
                credentials: Credentials::example(),
                email: "coordinator@example.com".into(),
                full_name: "Survey Coordinator".into(),
                is_superuser: true,
            }
        }
    }
}
