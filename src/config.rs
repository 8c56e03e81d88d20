//! Connection and run configuration.
//!
//! The environment is read once, at process start, into a [`DbConfig`].
//! Nothing below the binaries looks at environment variables.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Default name of the tracking table.
pub const DEFAULT_TRACKING_TABLE: &str = "schema_migrations";

/// Default per-statement timeout applied to every pooled connection.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection parameters for the target database.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// TLS without verifying the server certificate chain.
    pub ssl: bool,
    pub statement_timeout: Duration,
}

impl DbConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// `DB_*` variables take precedence over their libpq `PG*` equivalents.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |primary: &'static str, fallback: &'static str| {
            lookup(primary)
                .filter(|v| !v.is_empty())
                .map(|v| (primary, v))
                .or_else(|| {
                    lookup(fallback)
                        .filter(|v| !v.is_empty())
                        .map(|v| (fallback, v))
                })
        };

        let password = get("DB_PASSWORD", "PGPASSWORD")
            .map(|(_, v)| v)
            .ok_or(ConfigError::MissingPassword)?;

        let port = match get("DB_PORT", "PGPORT") {
            Some((var, value)) => match value.trim().parse::<u16>() {
                Ok(p) if p > 0 => p,
                _ => return Err(ConfigError::InvalidPort { var, value }),
            },
            None => DEFAULT_PORT,
        };

        let ssl = lookup("DB_SSL")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            host: get("DB_HOST", "PGHOST")
                .map(|(_, v)| v)
                .unwrap_or_else(|| "localhost".to_string()),
            port,
            database: get("DB_NAME", "PGDATABASE")
                .map(|(_, v)| v)
                .unwrap_or_else(|| "postgres".to_string()),
            user: get("DB_USER", "PGUSER")
                .map(|(_, v)| v)
                .unwrap_or_else(|| "postgres".to_string()),
            password,
            ssl,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        })
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// `host:port/database`, for progress output. Never includes credentials.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

/// A validated, unquoted SQL identifier naming the tracking table.
///
/// It is interpolated into DDL, so only plain identifiers are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        let mut chars = name.chars();
        let valid_head = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid_head && valid_tail && name.len() <= 63 {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidTableName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TRACKING_TABLE.to_string())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
