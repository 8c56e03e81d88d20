//! In-memory tracking store and helpers shared by the integration tests.
//!
//! `MemoryStore` understands just enough SQL to model schema dependencies:
//!
//! - `CREATE TABLE [IF NOT EXISTS] name ...`
//! - `ALTER TABLE name ...` (table must exist)
//! - `DROP TABLE name`
//! - `RAISE message` fails without a SQLSTATE
//! - `RAISE_CODE code message` fails with a SQLSTATE
//!
//! Anything else succeeds as a no-op. A unit's statements run against a
//! copy of the schema that is only kept if every statement succeeds.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use stockroom_migrate::prelude::*;

#[derive(Default)]
struct State {
    tables: BTreeSet<String>,
    records: Vec<MigrationRecord>,
    next_id: i64,
}

impl State {
    fn insert_record(&mut self, name: &str) {
        if self.records.iter().any(|r| r.name == name) {
            return;
        }
        self.next_id += 1;
        self.records.push(MigrationRecord {
            id: self.next_id,
            name: name.to_string(),
            executed_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    tracking_table: AtomicBool,
    fail_mark_applied: AtomicBool,
    disconnect_on: Mutex<Option<String>>,
    pub apply_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that exists before any migration runs (created out of band).
    pub fn with_table(self, name: &str) -> Self {
        self.state.lock().unwrap().tables.insert(name.to_string());
        self
    }

    /// A tracking record that exists before the run.
    pub fn with_record(self, name: &str) -> Self {
        self.state.lock().unwrap().insert_record(name);
        self
    }

    /// Make every `mark_applied` call fail.
    pub fn failing_mark_applied(self) -> Self {
        self.fail_mark_applied.store(true, Ordering::SeqCst);
        self
    }

    /// Drop the "connection" when `name` is applied.
    pub fn disconnecting_on(self, name: &str) -> Self {
        *self.disconnect_on.lock().unwrap() = Some(name.to_string());
        self
    }

    pub fn tables(&self) -> Vec<String> {
        self.state.lock().unwrap().tables.iter().cloned().collect()
    }

    pub fn record_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn has_tracking_table(&self) -> bool {
        self.tracking_table.load(Ordering::SeqCst)
    }
}

fn table_name(rest: &str) -> String {
    rest.split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn execute_statement(tables: &mut BTreeSet<String>, stmt: &str) -> Result<(), StoreError> {
    let lower = stmt.to_lowercase();

    if let Some(rest) = lower.strip_prefix("create table if not exists ") {
        tables.insert(table_name(rest));
    } else if let Some(rest) = lower.strip_prefix("create table ") {
        let name = table_name(rest);
        if !tables.insert(name.clone()) {
            return Err(StoreError::statement(
                Some("42P07"),
                format!("relation \"{name}\" already exists"),
            ));
        }
    } else if let Some(rest) = lower.strip_prefix("alter table ") {
        let name = table_name(rest);
        if !tables.contains(&name) {
            return Err(StoreError::statement(
                Some("42P01"),
                format!("relation \"{name}\" does not exist"),
            ));
        }
    } else if let Some(rest) = lower.strip_prefix("drop table ") {
        tables.remove(&table_name(rest));
    } else if lower.starts_with("raise_code ") {
        let mut parts = stmt["raise_code ".len()..].splitn(2, ' ');
        let code = parts.next().unwrap_or_default();
        let message = parts.next().unwrap_or_default();
        return Err(StoreError::server(Some(code), message));
    } else if lower.starts_with("raise ") {
        return Err(StoreError::statement(None, &stmt["raise ".len()..]));
    }
    Ok(())
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn ensure_tracking_table(&self) -> Result<(), StoreError> {
        self.tracking_table.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_applied(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .iter()
            .any(|r| r.name == name))
    }

    async fn mark_applied(&self, name: &str) -> Result<(), StoreError> {
        if self.fail_mark_applied.load(Ordering::SeqCst) {
            return Err(StoreError::statement(
                Some("42501"),
                "permission denied for table schema_migrations",
            ));
        }
        self.state.lock().unwrap().insert_record(name);
        Ok(())
    }

    async fn apply(&self, name: &str, body: &str) -> Result<(), StoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if self.disconnect_on.lock().unwrap().as_deref() == Some(name) {
            return Err(StoreError::connectivity("connection reset by peer"));
        }

        let mut state = self.state.lock().unwrap();
        let mut scratch = state.tables.clone();
        let statements = body
            .lines()
            .filter(|l| !l.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");

        for stmt in statements.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            execute_statement(&mut scratch, stmt)?;
        }

        state.tables = scratch;
        state.insert_record(name);
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        Ok(self.state.lock().unwrap().records.clone())
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables())
    }
}

/// Write `name.sql` into `dir` and return its unit.
pub fn unit(dir: &Path, name: &str, body: &str) -> MigrationUnit {
    let path = dir.join(format!("{name}.sql"));
    std::fs::write(&path, body).unwrap();
    MigrationUnit::new(name, path)
}

/// A unit whose file does not exist.
pub fn missing_unit(dir: &Path, name: &str) -> MigrationUnit {
    MigrationUnit::new(name, dir.join(format!("{name}.sql")))
}

pub fn outcomes(summary: &RunSummary) -> Vec<(&str, Outcome)> {
    summary
        .units
        .iter()
        .map(|r| (r.identifier.as_str(), r.outcome))
        .collect()
}
