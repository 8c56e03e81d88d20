//! Applied / pending view of a plan against the tracking table.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MigrateError;
use crate::plan::MigrationUnit;
use crate::store::{MigrationRecord, TrackingStore};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn is_applied(&self) -> bool {
        self.executed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Every plan entry, in plan order.
    pub plan: Vec<StatusEntry>,
    /// Records whose name is not part of the plan.
    pub unknown: Vec<MigrationRecord>,
}

impl StatusReport {
    pub fn build(units: &[MigrationUnit], records: Vec<MigrationRecord>) -> Self {
        let plan = units
            .iter()
            .map(|unit| StatusEntry {
                name: unit.identifier.clone(),
                executed_at: records
                    .iter()
                    .find(|r| r.name == unit.identifier)
                    .map(|r| r.executed_at),
            })
            .collect();

        let unknown = records
            .into_iter()
            .filter(|r| !units.iter().any(|u| u.identifier == r.name))
            .collect();

        Self { plan, unknown }
    }

    pub fn pending(&self) -> usize {
        self.plan.iter().filter(|e| !e.is_applied()).count()
    }
}

/// Ensure the tracking table and compare its contents with `units`.
pub async fn collect_status<S: TrackingStore>(
    store: &S,
    units: &[MigrationUnit],
) -> Result<StatusReport, MigrateError> {
    store.ensure_tracking_table().await?;
    let records = store.applied_migrations().await?;
    Ok(StatusReport::build(units, records))
}
