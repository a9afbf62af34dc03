mod principal;
mod token;

pub use principal::{Author, JwtResolver, Principal, PrincipalResolver};
pub use token::{AuthToken, TokenResponse, AUTH_TOKEN_COOKIE};
