use std::env;
use std::path::PathBuf;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::DbInfraError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_AUTH_SOURCE: &str = "admin";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 3000;

/// How to reach the target engine with the administrative identity that
/// performs the provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Full connection string. When set, host/port/credentials are ignored.
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub auth_source: String,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            uri: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            admin_user: None,
            admin_password: None,
            auth_source: DEFAULT_AUTH_SOURCE.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            server_selection_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl EngineSettings {
    /// Read settings from `MONGO_*` environment variables.
    pub fn from_env() -> Result<Self, DbInfraError> {
        let connect_timeout_ms = parse_var("MONGO_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?;

        Ok(Self {
            uri: optional_var("MONGO_URI"),
            host: optional_var("MONGO_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var("MONGO_PORT", DEFAULT_PORT)?,
            admin_user: optional_var("MONGO_ADMIN_USER"),
            admin_password: optional_var("MONGO_ADMIN_PASSWORD"),
            auth_source: optional_var("MONGO_AUTH_SOURCE")
                .unwrap_or_else(|| DEFAULT_AUTH_SOURCE.to_string()),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            server_selection_timeout: Duration::from_millis(connect_timeout_ms),
        })
    }

    pub fn validate(&self) -> Result<(), DbInfraError> {
        if let Some(uri) = &self.uri {
            if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
                return Err(DbInfraError::config(format!(
                    "connection string must start with mongodb:// or mongodb+srv://, got '{}'",
                    sanitize_db_url(uri)
                )));
            }
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(DbInfraError::config("engine host must not be empty"));
        }
        if self.port == 0 {
            return Err(DbInfraError::config("engine port must not be 0"));
        }
        match (&self.admin_user, &self.admin_password) {
            (Some(_), None) => Err(DbInfraError::config(
                "admin user is set but MONGO_ADMIN_PASSWORD is missing",
            )),
            (None, Some(_)) => Err(DbInfraError::config(
                "admin password is set but MONGO_ADMIN_USER is missing",
            )),
            _ => Ok(()),
        }
    }

    /// Connection string for the admin client. Credentials are percent-encoded.
    pub fn make_conn_spec(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.clone();
        }

        match (&self.admin_user, &self.admin_password) {
            (Some(user), Some(password)) => format!(
                "mongodb://{}:{}@{}:{}/?authSource={}",
                utf8_percent_encode(user, NON_ALPHANUMERIC),
                utf8_percent_encode(password, NON_ALPHANUMERIC),
                self.host,
                self.port,
                utf8_percent_encode(&self.auth_source, NON_ALPHANUMERIC),
            ),
            _ => format!("mongodb://{}:{}/", self.host, self.port),
        }
    }
}

/// Sanitize a connection string by masking the password.
/// Used for lock keys and logging.
pub fn sanitize_db_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((auth_part, host_part)) = rest.rsplit_once('@') else {
        return url.to_string();
    };

    match auth_part.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host_part}"),
        None => url.to_string(),
    }
}

/// Directory holding bootstrap lock files (`PROVISION_LOCK_DIR`, default: system temp dir).
pub fn lock_dir() -> PathBuf {
    optional_var("PROVISION_LOCK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
}

/// How long to wait for the bootstrap lock (`PROVISION_LOCK_TIMEOUT_MS`).
pub fn lock_timeout() -> Result<Duration, DbInfraError> {
    parse_var("PROVISION_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS).map(Duration::from_millis)
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, DbInfraError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            DbInfraError::config(format!(
                "environment variable '{name}' has invalid value '{raw}': {e}"
            ))
        }),
    }
}
