//! Migration orchestrator.
//!
//! Applies an ordered list of [`MigrationUnit`]s against a [`TrackingStore`],
//! one at a time, in list order:
//!
//! ```text
//! PENDING ─┬─> SKIPPED_MISSING      (source file absent)
//!          ├─> SKIPPED_APPLIED      (already in the tracking table)
//!          └─> APPLYING ─┬─> APPLIED
//!                        ├─> RECOVERED  (object already existed; marked applied)
//!                        └─> ERRORED
//! ```
//!
//! Per-unit failures end up in the [`RunSummary`]. Only connectivity loss and
//! tracking-store failures outside a unit abort the run.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::conflict::ConflictMatcher;
use crate::error::{MigrateError, UnitError};
use crate::plan::MigrationUnit;
use crate::store::{MigrationRecord, TrackingStore};

/// What to do after a unit ends in the errored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the error and move on to the next unit.
    #[default]
    Continue,
    /// Stop the run at the first errored unit.
    FailFast,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub conflicts: ConflictMatcher,
    pub policy: ErrorPolicy,
}

/// Terminal state of a unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Recovered,
    SkippedMissing,
    SkippedApplied,
    Errored,
}

impl Outcome {
    pub fn is_skipped(self) -> bool {
        matches!(self, Outcome::SkippedMissing | Outcome::SkippedApplied)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Applied | Outcome::Recovered)
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Recovered => "recovered",
            Outcome::SkippedMissing => "skipped (file not found)",
            Outcome::SkippedApplied => "skipped (already executed)",
            Outcome::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub identifier: String,
    pub source: PathBuf,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitError>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub applied: usize,
    pub recovered: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Recovered => self.recovered += 1,
            Outcome::SkippedMissing | Outcome::SkippedApplied => self.skipped += 1,
            Outcome::Errored => self.errored += 1,
        }
    }

    /// Applied plus recovered.
    pub fn successful(&self) -> usize {
        self.applied + self.recovered
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub units: Vec<UnitReport>,
    pub tally: Tally,
    /// True when the fail-fast policy stopped the run early.
    pub aborted: bool,
    /// Tracking table contents after the run.
    pub applied: Vec<MigrationRecord>,
    /// Tables present after the run.
    pub tables: Vec<String>,
}

impl RunSummary {
    pub fn has_errors(&self) -> bool {
        self.tally.errored > 0
    }

    /// Process exit status: non-zero iff a unit errored.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_errors())
    }

    pub fn outcome_of(&self, identifier: &str) -> Option<Outcome> {
        self.units
            .iter()
            .find(|r| r.identifier == identifier)
            .map(|r| r.outcome)
    }
}

/// Progress callbacks, invoked in unit order.
pub trait RunObserver {
    fn unit_started(&mut self, _index: usize, _total: usize, _unit: &MigrationUnit) {}

    fn unit_finished(&mut self, _index: usize, _total: usize, _report: &UnitReport) {}
}

/// Observer that ignores everything.
pub struct Silent;

impl RunObserver for Silent {}

pub struct Migrator<S> {
    store: S,
    options: RunOptions,
}

impl<S: TrackingStore> Migrator<S> {
    pub fn new(store: S, options: RunOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub async fn run(&self, units: &[MigrationUnit]) -> Result<RunSummary, MigrateError> {
        self.run_observed(units, &mut Silent).await
    }

    /// Apply a single unit through the same path as [`run`](Self::run).
    pub async fn run_one(&self, unit: &MigrationUnit) -> Result<RunSummary, MigrateError> {
        self.run(std::slice::from_ref(unit)).await
    }

    pub async fn run_one_observed(
        &self,
        unit: &MigrationUnit,
        observer: &mut dyn RunObserver,
    ) -> Result<RunSummary, MigrateError> {
        self.run_observed(std::slice::from_ref(unit), observer).await
    }

    pub async fn run_observed(
        &self,
        units: &[MigrationUnit],
        observer: &mut dyn RunObserver,
    ) -> Result<RunSummary, MigrateError> {
        self.store.ensure_tracking_table().await?;

        let total = units.len();
        let mut reports = Vec::with_capacity(total);
        let mut tally = Tally::default();
        let mut aborted = false;

        for (index, unit) in units.iter().enumerate() {
            observer.unit_started(index, total, unit);

            let started = Instant::now();
            let (outcome, error) = self.apply_unit(unit).await?;
            let report = UnitReport {
                identifier: unit.identifier.clone(),
                source: unit.source.clone(),
                outcome,
                error,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };

            tally.record(outcome);
            observer.unit_finished(index, total, &report);
            reports.push(report);

            if outcome == Outcome::Errored && self.options.policy == ErrorPolicy::FailFast {
                warn!(
                    migration = %unit.identifier,
                    remaining = total - index - 1,
                    "stopping at first error"
                );
                aborted = true;
                break;
            }
        }

        let applied = self.store.applied_migrations().await?;
        let tables = self.store.list_tables().await?;

        info!(
            applied = tally.applied,
            recovered = tally.recovered,
            skipped = tally.skipped,
            errored = tally.errored,
            "run finished"
        );

        Ok(RunSummary {
            units: reports,
            tally,
            aborted,
            applied,
            tables,
        })
    }

    async fn apply_unit(
        &self,
        unit: &MigrationUnit,
    ) -> Result<(Outcome, Option<UnitError>), MigrateError> {
        let name = unit.identifier.as_str();

        let body = match unit.load_body().await {
            Ok(Some(body)) => body,
            Ok(None) => {
                info!(migration = name, path = %unit.source.display(), "source not found, skipping");
                return Ok((Outcome::SkippedMissing, None));
            }
            Err(e) => {
                error!(migration = name, path = %unit.source.display(), error = %e, "cannot read source");
                return Ok((
                    Outcome::Errored,
                    Some(UnitError::SourceUnreadable {
                        path: unit.source.clone(),
                        message: e.to_string(),
                    }),
                ));
            }
        };

        if self.store.is_applied(name).await? {
            info!(migration = name, "already executed, skipping");
            return Ok((Outcome::SkippedApplied, None));
        }

        debug!(migration = name, bytes = body.len(), "applying");

        let err = match self.store.apply(name, &body).await {
            Ok(()) => {
                info!(migration = name, "applied");
                return Ok((Outcome::Applied, None));
            }
            Err(e) if e.is_connectivity() => return Err(MigrateError::Connectivity(e)),
            Err(e) => e,
        };

        if !self.options.conflicts.is_benign(&err) {
            error!(migration = name, error = %err, code = ?err.code, "migration failed");
            return Ok((Outcome::Errored, Some(UnitError::Execution { error: err })));
        }

        warn!(
            migration = name,
            error = %err,
            "objects already exist, marking as executed"
        );

        match self.store.mark_applied(name).await {
            Ok(()) => Ok((Outcome::Recovered, None)),
            Err(e) if e.is_connectivity() => Err(MigrateError::Connectivity(e)),
            Err(e) => {
                error!(migration = name, error = %e, "failed to mark migration as executed");
                Ok((Outcome::Errored, Some(UnitError::TrackingWrite { error: e })))
            }
        }
    }
}
