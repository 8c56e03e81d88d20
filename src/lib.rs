//! # stockroom-migrate
//!
//! Ordered, idempotent schema migrations for the Stockroom inventory
//! backend's PostgreSQL database.
//!
//! A run walks an explicit, caller-ordered list of SQL files. Each unit is
//! applied at most once, inside a transaction, and recorded in a tracking
//! table. Units whose objects already exist are recorded without re-running
//! their DDL.
//!
//! ```ignore
//! use stockroom_migrate::prelude::*;
//!
//! let db = DbConfig::from_env()?;
//! let store = PgTrackingStore::connect(&db, TableName::default()).await?;
//! let plan = Plan::builtin("migrations");
//! let summary = Migrator::new(store, RunOptions::default()).run(plan.units()).await?;
//! std::process::exit(summary.exit_code().into());
//! ```

pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod logging;
pub mod migrator;
pub mod plan;
pub mod status;
pub mod store;

pub mod prelude {
    pub use crate::config::{DbConfig, TableName};
    pub use crate::conflict::ConflictMatcher;
    pub use crate::error::{ConfigError, MigrateError, StoreError, StoreErrorKind, UnitError};
    pub use crate::migrator::{
        ErrorPolicy, Migrator, Outcome, RunObserver, RunOptions, RunSummary, Tally, UnitReport,
    };
    pub use crate::plan::{MigrationUnit, Plan};
    pub use crate::status::{StatusReport, collect_status};
    pub use crate::store::{MigrationRecord, PgTrackingStore, TrackingStore};
}
