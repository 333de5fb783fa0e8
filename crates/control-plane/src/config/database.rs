//! PostgreSQL settings for the execution record store.

use std::str::FromStr;

use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Connection settings, read from `POSTGRES_*` variables.
///
/// `POSTGRES_URL` wins over the individual host/port/user/password/database
/// fields when set. `POSTGRES_SSL_MODE` takes libpq names (`disable`,
/// `prefer`, `require`, `verify-ca`, `verify-full`).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_name")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_name")]
    pub database: String,

    #[serde(default)]
    pub ssl_mode: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_name() -> String {
    "nbforge".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("POSTGRES_").from_env::<DatabaseConfig>()
    }

    /// Connection options from the URL or the individual fields.
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = match self.url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => PgConnectOptions::from_str(url)?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.database),
        };
        let options = options.application_name("nbforge-control-plane");
        Ok(match &self.ssl_mode {
            Some(mode) => options.ssl_mode(PgSslMode::from_str(mode)?),
            None => options,
        })
    }

    /// `host:port/database` for logs; never includes credentials.
    pub fn target(&self) -> String {
        match self.connect_options() {
            Ok(options) => format!(
                "{}:{}/{}",
                options.get_host(),
                options.get_port(),
                options.get_database().unwrap_or_default()
            ),
            Err(_) => "<invalid POSTGRES_URL>".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_name(),
            password: String::new(),
            database: default_name(),
            ssl_mode: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}
