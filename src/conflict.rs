//! Benign-conflict classification.
//!
//! A unit whose DDL fails because its target object already exists was most
//! likely applied before, out of band. Such failures are recovered by marking
//! the unit applied instead of reporting an error.

use crate::error::StoreError;

/// SQLSTATE codes that mean "the object already exists".
pub const DEFAULT_CONFLICT_CODES: &[&str] = &[
    "42P07", // duplicate_table
    "42701", // duplicate_column
    "42710", // duplicate_object
    "42P06", // duplicate_schema
    "42723", // duplicate_function
    "42712", // duplicate_alias
    "42P04", // duplicate_database
];

/// Message fragments used when the server supplied no SQLSTATE.
pub const DEFAULT_CONFLICT_PHRASES: &[&str] = &["already exists", "duplicate", "if not exists"];

/// Decides whether a store failure is a benign conflict.
///
/// A structured SQLSTATE is authoritative when present. The phrase list is
/// only consulted for failures that carry no code. Connectivity failures are
/// never benign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMatcher {
    codes: Vec<String>,
    phrases: Vec<String>,
}

impl ConflictMatcher {
    pub fn new<C, P>(codes: C, phrases: P) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|c| c.into().to_ascii_uppercase())
                .collect(),
            phrases: phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_benign(&self, err: &StoreError) -> bool {
        if err.is_connectivity() {
            return false;
        }
        match &err.code {
            Some(code) => self.codes.iter().any(|c| c.eq_ignore_ascii_case(code)),
            None => {
                let message = err.message.to_lowercase();
                self.phrases.iter().any(|p| message.contains(p.as_str()))
            }
        }
    }
}

impl Default for ConflictMatcher {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONFLICT_CODES.iter().copied(),
            DEFAULT_CONFLICT_PHRASES.iter().copied(),
        )
    }
}
