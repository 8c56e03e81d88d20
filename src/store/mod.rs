//! Tracking store: the durable record of applied migrations.
//!
//! The orchestrator only talks to a [`TrackingStore`]. The production
//! implementation is [`PgTrackingStore`]; tests drive the orchestrator with
//! an in-memory store.

mod postgres;

pub use postgres::{PgTrackingStore, tracking_table_ddl};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

/// One row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create the tracking table if absent. Safe to call concurrently.
    async fn ensure_tracking_table(&self) -> Result<(), StoreError>;

    async fn is_applied(&self, name: &str) -> Result<bool, StoreError>;

    /// Record `name` as applied in its own transaction.
    ///
    /// Recording an already-present name is a no-op.
    async fn mark_applied(&self, name: &str) -> Result<(), StoreError>;

    /// Execute `body` and record `name` in one transaction.
    ///
    /// On any failure the transaction is rolled back before returning, so
    /// neither the body's effects nor the record persist.
    async fn apply(&self, name: &str, body: &str) -> Result<(), StoreError>;

    /// All records, in insertion order.
    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Tables in the target schema, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>, StoreError>;
}
