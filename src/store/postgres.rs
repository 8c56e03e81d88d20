//! PostgreSQL tracking store on a sqlx pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode};
use tracing::{debug, warn};

use super::{MigrationRecord, TrackingStore};
use crate::config::{DbConfig, TableName};
use crate::error::StoreError;

/// How long to wait for a pooled connection before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// DDL for the tracking table.
pub fn tracking_table_ddl(table: &TableName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
             id SERIAL PRIMARY KEY,\n    \
             migration_name VARCHAR(255) NOT NULL UNIQUE,\n    \
             executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
         )"
    )
}

/// Connection options for `config`.
///
/// With `ssl` set the session is encrypted but the server certificate is
/// not verified (`sslmode=require`).
pub fn connect_options(config: &DbConfig) -> PgConnectOptions {
    let ssl_mode = if config.ssl {
        PgSslMode::Require
    } else {
        PgSslMode::Disable
    };

    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password)
        .ssl_mode(ssl_mode)
        .application_name(env!("CARGO_PKG_NAME"))
        .options([(
            "statement_timeout",
            config.statement_timeout.as_millis().to_string(),
        )])
}

pub struct PgTrackingStore {
    pool: PgPool,
    table: TableName,
}

impl PgTrackingStore {
    /// Connect to the database described by `config`.
    ///
    /// The pool holds a single connection: units are applied one at a time
    /// and each transaction owns that connection until it commits or rolls
    /// back. Any failure here, including authentication, is a connectivity
    /// error.
    ///
    /// A refused connection or rejected login surfaces with the driver's
    /// message from a first direct connection, not as a pool timeout.
    pub async fn connect(config: &DbConfig, table: TableName) -> Result<Self, StoreError> {
        debug!(db = %config.target(), ssl = config.ssl, "connecting");
        let options = connect_options(config);

        let first = tokio::time::timeout(ACQUIRE_TIMEOUT, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                StoreError::connectivity(format!(
                    "no answer from {} within {}s",
                    config.target(),
                    ACQUIRE_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| StoreError::connectivity(e.to_string()))?;
        if let Err(e) = first.close().await {
            debug!(error = %e, "closing first connection failed");
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connectivity(e.to_string()))?;

        Ok(Self::new(pool, table))
    }

    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (migration_name) VALUES ($1) ON CONFLICT (migration_name) DO NOTHING",
            self.table
        )
    }

    fn applied_sql(&self) -> String {
        format!(
            "SELECT id::bigint, migration_name, executed_at::timestamptz FROM {} ORDER BY id",
            self.table
        )
    }
}

#[async_trait]
impl TrackingStore for PgTrackingStore {
    async fn ensure_tracking_table(&self) -> Result<(), StoreError> {
        let ddl = tracking_table_ddl(&self.table);
        match sqlx::raw_sql(&ddl).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = StoreError::from(e);
                // A concurrent CREATE TABLE IF NOT EXISTS can still lose the
                // race on pg_type / pg_class.
                match err.code.as_deref() {
                    Some("42P07") | Some("23505") => {
                        debug!(table = %self.table, "tracking table created concurrently");
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
        }
    }

    async fn is_applied(&self, name: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE migration_name = $1)",
            self.table
        );
        let exists = sqlx::query_scalar::<_, bool>(&sql)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn mark_applied(&self, name: &str) -> Result<(), StoreError> {
        let insert = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        sqlx::query(&insert).bind(name).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply(&self, name: &str, body: &str) -> Result<(), StoreError> {
        let insert = self.insert_sql();
        let mut tx = self.pool.begin().await?;

        // A bare &str runs over the simple-query protocol, which accepts
        // several statements in one body.
        let result = match sqlx::Executor::execute(&mut *tx, body).await {
            Ok(_) => sqlx::query(&insert)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(rollback) = tx.rollback().await {
                warn!(migration = name, error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        let sql = self.applied_sql();
        let rows = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, executed_at)| MigrationRecord {
                id,
                name,
                executed_at,
            })
            .collect())
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }
}
