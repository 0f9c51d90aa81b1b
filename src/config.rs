use crate::error::AuthResult;
use crate::service::auth_state::ErrorPolicy;
use crate::service::key_router::KeyRouting;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "WA_AUTH_";

/// Process-wide configuration, resolved on first access.
pub static CONFIG: LazyLock<Config> =
    LazyLock::new(|| Config::load().expect("FATAL: failed to load configuration"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub loglevel: String,
    /// sqlx connection string, e.g. `sqlite:auth.db`.
    pub database_url: String,
    pub max_connections: u32,
    /// Root folder for file-backed keys; one sub-folder per session.
    pub sessions_dir: PathBuf,
    pub session_id: String,
    pub routing: KeyRouting,
    pub error_policy: ErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            database_url: "sqlite:auth.db".to_string(),
            max_connections: 5,
            sessions_dir: PathBuf::from("sessions"),
            session_id: "default".to_string(),
            routing: KeyRouting::default(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults, then `config.toml`, then `WA_AUTH_*` environment variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load() -> AuthResult<Self> {
        Ok(Self::figment().extract()?)
    }
}
