use log::{info, warn};
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        auth::{AuthToken, TokenResponse, AUTH_TOKEN_COOKIE},
        user::Credentials,
    },
    Config,
};

use super::{Body, Users};

pub fn routes() -> Vec<Route> {
    routes![login, logout]
}

/// Exchange a username and password for a signed token, returned in the
/// body and as a cookie.
#[post("/auth/token", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Body<'_, Credentials>,
    users: &State<Users>,
    config: &State<Config>,
) -> Result<Json<TokenResponse>> {
    let credentials = credentials?.into_inner();
    let user = users.find_user_by_username(&credentials.username).await?;
    let user = match user {
        Some(user) if user.is_active && user.verify_password(&credentials.password)? => user,
        _ => {
            warn!("Failed login attempt for '{}'", credentials.username);
            return Err(Error::Unauthorized(
                "Incorrect username or password".to_string(),
            ));
        }
    };

    let token = AuthToken::new(&user, config).encode(config)?;
    cookies.add(AuthToken::cookie(token.clone(), config));
    info!("'{}' logged in", user.username);

    Ok(Json(TokenResponse::bearer(token)))
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar<'_>) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Header},
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use super::*;

    use crate::model::{
        api::authoring::QuestionnaireSpec,
        user::{AccountRequest, NewUser},
    };
    use crate::store::{MemoryStore, UserDirectory};

    async fn add_example_user(store: &MemoryStore, active: bool) {
        let mut user = NewUser::try_from(AccountRequest::example()).unwrap();
        user.is_active = active;
        store.insert_user(user).await.unwrap();
    }

    async fn login_as(client: &Client, credentials: &Credentials) -> Status {
        client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(credentials).to_string())
            .dispatch()
            .await
            .status()
    }

    #[backend_test]
    async fn login_valid(client: Client, store: MemoryStore) {
        add_example_user(&store, true).await;

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(Credentials::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let token: TokenResponse = response.into_json().await.unwrap();
        assert_eq!(token.token_type, "bearer");
        let config = client.rocket().state::<Config>().unwrap();
        let claims = AuthToken::decode(&token.access_token, config).unwrap();
        assert_eq!(claims.username, Credentials::example().username);
    }

    #[backend_test]
    async fn login_invalid(client: Client, store: MemoryStore) {
        add_example_user(&store, true).await;

        // Unknown username.
        let mut credentials = Credentials::example();
        credentials.username = "nobody".to_string();
        assert_eq!(Status::Unauthorized, login_as(&client, &credentials).await);

        // Wrong password.
        let mut credentials = Credentials::example();
        credentials.password = "not the password".to_string();
        assert_eq!(Status::Unauthorized, login_as(&client, &credentials).await);

        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn inactive_user_cannot_login(client: Client, store: MemoryStore) {
        add_example_user(&store, false).await;
        assert_eq!(
            Status::Unauthorized,
            login_as(&client, &Credentials::example()).await
        );
    }

    #[backend_test(admin)]
    async fn logout_clears_cookie(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        // Operator endpoints are closed again.
        let response = client
            .post("/questionnaires")
            .header(ContentType::JSON)
            .body(json!(QuestionnaireSpec::satisfaction()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn bearer_header_authenticates(client: Client, store: MemoryStore) {
        add_example_user(&store, true).await;
        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(Credentials::example()).to_string())
            .dispatch()
            .await;
        let token: TokenResponse = response.into_json().await.unwrap();
        client.delete(uri!(logout)).dispatch().await;

        let response = client
            .post("/questionnaires")
            .header(ContentType::JSON)
            .header(Header::new(
                "Authorization",
                format!("Bearer {}", token.access_token),
            ))
            .body(json!(QuestionnaireSpec::satisfaction()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Created, response.status());

        // A forged token is refused outright.
        let response = client
            .post("/questionnaires")
            .header(ContentType::JSON)
            .header(Header::new("Authorization", "Bearer not.a.token"))
            .body(json!(QuestionnaireSpec::satisfaction()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }
}
