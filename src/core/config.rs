//! Application configuration from environment variables.
//!
//! Load configuration using `AppConfig::from_env()` after calling `dotenvy::dotenv()`.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::auth::password::DEFAULT_BCRYPT_COST;
use crate::core::auth::service::AuthSettings;
use crate::core::users::validator::ACCOUNT_ACTIVATION_TIMEOUT_SECS;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// HTTP mail relay settings
#[derive(Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_email: String,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("from_email", &self.from_email)
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    /// PostgreSQL connection URL; only required when running against PostgreSQL
    pub database_url: Option<String>,

    /// Secret key for signing access and action tokens
    pub secret_key: String,

    pub db_max_connections: u32,

    pub bind_addr: SocketAddr,

    /// Base for links in emails and for uploaded file URLs
    pub public_base_url: String,

    /// Seconds an unconfirmed account keeps its username and email
    pub account_activation_timeout_secs: i64,

    pub access_token_expire_days: i64,

    pub password_reset_token_max_age_secs: i64,

    pub uploads_dir: PathBuf,

    pub external_call_timeout_secs: u64,

    pub bcrypt_cost: u32,

    /// `None` logs outgoing mail instead of sending it
    pub mail: Option<MailConfig>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("has_database_url", &self.database_url.is_some())
            .field("db_max_connections", &self.db_max_connections)
            .field("secret_key", &"[REDACTED]")
            .field("bind_addr", &self.bind_addr)
            .field("public_base_url", &self.public_base_url)
            .field(
                "account_activation_timeout_secs",
                &self.account_activation_timeout_secs,
            )
            .field("access_token_expire_days", &self.access_token_expire_days)
            .field(
                "password_reset_token_max_age_secs",
                &self.password_reset_token_max_age_secs,
            )
            .field("uploads_dir", &self.uploads_dir)
            .field("external_call_timeout_secs", &self.external_call_timeout_secs)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("mail", &self.mail)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret_key = get("SECRET_KEY").ok_or(ConfigError::Missing("SECRET_KEY"))?;

        let mail = match get("MAIL_API_URL") {
            Some(api_url) => Some(MailConfig {
                api_url,
                api_key: get("MAIL_API_KEY").ok_or(ConfigError::Missing("MAIL_API_KEY"))?,
                from_email: get("MAIL_FROM_EMAIL")
                    .ok_or(ConfigError::Missing("MAIL_FROM_EMAIL"))?,
            }),
            None => None,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            secret_key,
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8000)))?,
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string())
                .trim_end_matches('/')
                .to_string(),
            account_activation_timeout_secs: parse_or(
                &get,
                "ACCOUNT_ACTIVATION_TIMEOUT",
                ACCOUNT_ACTIVATION_TIMEOUT_SECS,
            )?,
            access_token_expire_days: parse_or(&get, "JWT_ACCESS_TOKEN_EXPIRE_DAYS", 30)?,
            password_reset_token_max_age_secs: parse_or(
                &get,
                "PASSWORD_RESET_TOKEN_MAX_AGE",
                3_600,
            )?,
            uploads_dir: get("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("storage/uploads")),
            external_call_timeout_secs: parse_or(&get, "EXTERNAL_CALL_TIMEOUT_SECS", 10)?,
            bcrypt_cost: parse_or(&get, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?,
            mail,
        })
    }

    /// Database URL, or an error naming the missing variable
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            secret_key: self.secret_key.clone(),
            activation_timeout: chrono::Duration::seconds(self.account_activation_timeout_secs),
            reset_token_max_age: chrono::Duration::seconds(self.password_reset_token_max_age_secs),
            access_token_expire_days: self.access_token_expire_days,
            external_call_timeout: std::time::Duration::from_secs(self.external_call_timeout_secs),
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
