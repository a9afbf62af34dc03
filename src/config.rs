use std::sync::Arc;

use chrono::Duration;
use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::error::Result;
use crate::model::user::{AccountRequest, Credentials, NewUser};
use crate::store::{MemoryStore, MongoStore, SchemaStore, UserDirectory};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    #[serde(default = "default_require_auth")]
    require_auth: bool,
    // secrets
    jwt_secret: String,
}

fn default_require_auth() -> bool {
    true
}

impl Config {
    pub fn new(auth_ttl: u32, jwt_secret: &str, require_auth: bool) -> Self {
        Self {
            auth_ttl,
            require_auth,
            jwt_secret: jwt_secret.to_string(),
        }
    }

    /// Valid lifetime of auth tokens in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Whether authoring, deletion and response listing need a logged-in
    /// operator.
    pub fn require_auth(&self) -> bool {
        self.require_auth
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if !config.require_auth() {
            info!("Authentication is disabled for operator endpoints");
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Mongodb,
}

/// Configuration for the storage backend.
#[derive(Deserialize)]
pub struct StoreConfig {
    // non-secrets
    store_backend: StoreBackend,
    #[serde(default = "default_db_name")]
    db_name: String,
    #[serde(default)]
    admin_username: Option<String>,
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
    #[serde(default)]
    admin_password: Option<String>,
}

fn default_db_name() -> String {
    "pesquisa".to_string()
}

impl StoreConfig {
    /// The bootstrap superuser, if both halves are configured.
    fn admin(&self) -> Option<AccountRequest> {
        match (&self.admin_username, &self.admin_password) {
            (Some(username), Some(password)) => Some(AccountRequest {
                credentials: Credentials {
                    username: username.clone(),
                    password: password.clone(),
                },
                email: String::new(),
                full_name: "Administrator".to_string(),
                is_superuser: true,
            }),
            _ => None,
        }
    }
}

/// Make sure the bootstrap superuser exists, creating it if needed.
pub async fn ensure_admin_exists(users: &dyn UserDirectory, admin: AccountRequest) -> Result<()> {
    let username = admin.credentials.username.clone();
    if users.find_user_by_username(&username).await?.is_some() {
        return Ok(());
    }
    users.insert_user(NewUser::try_from(admin)?).await?;
    info!("Created superuser '{username}'");
    Ok(())
}

/// Place a backend into managed state under both of its roles.
pub fn manage_store<S>(rocket: Rocket<Build>, store: S) -> Rocket<Build>
where
    S: SchemaStore + UserDirectory + Clone + 'static,
{
    let schema: Arc<dyn SchemaStore> = Arc::new(store.clone());
    let users: Arc<dyn UserDirectory> = Arc::new(store);
    rocket.manage(schema).manage(users)
}

/// A fairing that loads the store config, connects to the chosen backend,
/// performs any setup necessary, and places it into managed state as both
/// an `Arc<dyn SchemaStore>` and an `Arc<dyn UserDirectory>`.
pub struct StoreFairing;

impl StoreFairing {
    async fn connect(
        config: &StoreConfig,
    ) -> std::result::Result<(Arc<dyn SchemaStore>, Arc<dyn UserDirectory>), String> {
        match config.store_backend {
            StoreBackend::Memory => {
                info!("Using in-memory store, data will not survive a restart");
                let store = MemoryStore::new();
                Ok((Arc::new(store.clone()), Arc::new(store)))
            }
            StoreBackend::Mongodb => {
                let uri = config
                    .db_uri
                    .as_deref()
                    .ok_or("`db_uri` must be set for the mongodb backend")?;
                let store = MongoStore::connect(uri, &config.db_name)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok((Arc::new(store.clone()), Arc::new(store)))
            }
        }
    }
}

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded store config, connecting...");

        let (schema, users) = match Self::connect(&config).await {
            Ok(stores) => stores,
            Err(e) => {
                error!("Failed to connect to store: {e}");
                return Err(rocket);
            }
        };

        // Ensure the configured superuser exists.
        if let Some(admin) = config.admin() {
            if let Err(e) = ensure_admin_exists(users.as_ref(), admin).await {
                error!("Failed to provision superuser: {e}");
                return Err(rocket);
            }
        }
        info!("...store online!");

        // Manage the state.
        rocket = rocket.manage(schema).manage(users);
        Ok(rocket)
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self::new(600, "test secret, do not use in production", true)
        }
    }
}
