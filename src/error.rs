//! Error types for the migration runner.
//!
//! Three layers:
//! - [`ConfigError`]: bad input detected before any connection attempt.
//! - [`StoreError`]: a failure reported by the tracking store / database.
//! - [`MigrateError`]: run-level failures that halt the whole run.
//!
//! Per-unit failures are [`UnitError`]s. They are collected into the run
//! summary instead of being propagated.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Invalid or missing configuration. Always raised before connecting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("database password is not set (export DB_PASSWORD or PGPASSWORD)")]
    MissingPassword,

    #[error("invalid port {value:?} in {var}: expected a number between 1 and 65535")]
    InvalidPort { var: &'static str, value: String },

    #[error(
        "invalid tracking table name {0:?}: expected letters, digits and underscores (max 63 bytes)"
    )]
    InvalidTableName(String),

    #[error("failed to read manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("migration #{index} in the plan has an empty name")]
    EmptyName { index: usize },

    #[error("migration {0:?} appears more than once in the plan")]
    DuplicateName(String),
}

/// Broad class of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The database could not be reached, or the connection broke.
    Connectivity,
    /// The server rejected a statement.
    Statement,
}

/// A failure reported by a [`TrackingStore`](crate::store::TrackingStore).
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    /// SQLSTATE, when the server supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Connectivity,
            code: None,
            message: message.into(),
        }
    }

    pub fn statement(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Statement,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// An error reported by the server, classified by its SQLSTATE.
    ///
    /// Connection exceptions (class `08`), shutdowns and `cannot_connect_now`
    /// (`57P01`..`57P03`) and `too_many_connections` (`53300`) mean the
    /// session is gone, so they are connectivity failures.
    pub fn server(code: Option<&str>, message: impl Into<String>) -> Self {
        let kind = match code {
            Some(code) if is_connection_failure(code) => StoreErrorKind::Connectivity,
            _ => StoreErrorKind::Statement,
        };
        Self {
            kind,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        self.kind == StoreErrorKind::Connectivity
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => StoreError::server(db.code().as_deref(), db.message()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::connectivity(e.to_string()),
            _ => StoreError::statement(None, e.to_string()),
        }
    }
}

fn is_connection_failure(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "53300")
}

/// Why a single unit ended in the errored state.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitError {
    #[error("cannot read {}: {message}", path.display())]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("{error}")]
    Execution { error: StoreError },

    #[error("object already existed but recording the migration failed: {error}")]
    TrackingWrite { error: StoreError },
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot reach the database: {0}")]
    Connectivity(StoreError),

    #[error("tracking store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for MigrateError {
    fn from(e: StoreError) -> Self {
        if e.is_connectivity() {
            MigrateError::Connectivity(e)
        } else {
            MigrateError::Store(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_routes_by_kind() {
        let err: MigrateError = StoreError::connectivity("connection refused").into();
        assert!(matches!(err, MigrateError::Connectivity(_)));

        let err: MigrateError = StoreError::statement(Some("42501"), "permission denied").into();
        assert!(matches!(err, MigrateError::Store(_)));
    }

    #[test]
    fn test_pool_timeout_is_connectivity() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_connectivity());
        assert!(err.code.is_none());
    }

    #[test]
    fn test_server_shutdown_codes_are_connectivity() {
        for code in ["08006", "08003", "57P01", "57P02", "57P03", "53300"] {
            let err = StoreError::server(Some(code), "terminating connection");
            assert!(err.is_connectivity(), "{code}");
            assert_eq!(err.code.as_deref(), Some(code));
        }

        let err = StoreError::server(Some("42P07"), "relation \"x\" already exists");
        assert_eq!(err.kind, StoreErrorKind::Statement);
        assert_eq!(StoreError::server(None, "boom").kind, StoreErrorKind::Statement);
    }

    #[test]
    fn test_row_not_found_is_statement() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind, StoreErrorKind::Statement);
    }

    #[test]
    fn test_unit_error_display() {
        let err = UnitError::TrackingWrite {
            error: StoreError::statement(None, "disk full"),
        };
        assert!(err.to_string().contains("disk full"));
        assert!(err.to_string().contains("recording the migration failed"));
    }

    #[test]
    fn test_unit_error_serializes_with_kind_tag() {
        let err = UnitError::Execution {
            error: StoreError::statement(Some("42601"), "syntax error at or near \"TABEL\""),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "execution");
        assert_eq!(json["error"]["code"], "42601");
        assert_eq!(json["error"]["kind"], "statement");
    }
}
