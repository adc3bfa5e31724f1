//! Error Store
//!
//! The single source of truth for which cells hold an invalid value.
//! Keys are `ErrorKey`s; the order of entries carries no meaning.
//!
//! Every mutation bumps `version` so observers can detect change without
//! diffing. Bulk operations bump it once.

use std::collections::BTreeMap;

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::error_key::{parse_key, ErrorKey, UniqueKey};
use crate::schema::ColumnSchema;

/// One recorded error. Never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Persisted layout: `{ "<error key>": { "message": .., "timestamp": .. } }`.
pub type ErrorMap = BTreeMap<String, ErrorRecord>;

/// In-memory error set keyed by parsed keys.
pub type ErrorSet = FxHashMap<ErrorKey, ErrorRecord>;

/// Decode a persisted map. Malformed keys are skipped.
pub fn decode_map(map: &ErrorMap) -> ErrorSet {
    let mut set = ErrorSet::default();
    for (raw, record) in map {
        match parse_key(raw) {
            Some(key) => {
                set.insert(key, record.clone());
            }
            None => log::debug!("skipping malformed error key '{}'", raw),
        }
    }
    set
}

/// Encode an error set in the persisted layout.
pub fn encode_set(set: &ErrorSet) -> ErrorMap {
    set.iter()
        .map(|(key, record)| (key.to_string(), record.clone()))
        .collect()
}

/// Rewrite legacy `(row, col_index)` keys into unique-key form against `schema`.
/// Legacy keys whose position is outside the schema are dropped.
pub fn upgrade_legacy_keys(set: ErrorSet, schema: &ColumnSchema) -> ErrorSet {
    let mut upgraded = ErrorSet::default();
    for (key, record) in set {
        if !key.is_legacy() {
            upgraded.insert(key, record);
            continue;
        }
        match schema.resolve_key(&key) {
            Some((_, unique)) => {
                let new_key = ErrorKey::new(key.row, unique.clone());
                // A current-format entry for the same cell wins
                upgraded.entry(new_key).or_insert(record);
            }
            None => log::debug!("dropping legacy key '{}' outside the schema", key),
        }
    }
    upgraded
}

#[derive(Debug, Clone, Default)]
pub struct ErrorStore {
    errors: ErrorSet,
    version: u64,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a persisted map.
    pub fn from_map(map: &ErrorMap) -> Self {
        Self {
            errors: decode_map(map),
            version: 0,
        }
    }

    /// Build a store from the JSON form of the persisted map.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let map: ErrorMap = serde_json::from_str(json)?;
        Ok(Self::from_map(&map))
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, key: &ErrorKey) -> Option<&ErrorRecord> {
        self.errors.get(key)
    }

    pub fn contains(&self, key: &ErrorKey) -> bool {
        self.errors.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ErrorKey, &ErrorRecord)> {
        self.errors.iter()
    }

    /// Borrow the full set.
    pub fn errors(&self) -> &ErrorSet {
        &self.errors
    }

    /// Record an error, replacing any previous record for the same key.
    pub fn add(&mut self, key: ErrorKey, message: impl Into<String>) {
        self.insert_record(key, ErrorRecord::new(message));
    }

    pub fn insert_record(&mut self, key: ErrorKey, record: ErrorRecord) {
        self.errors.insert(key, record);
        self.bump();
    }

    pub fn remove(&mut self, key: &ErrorKey) -> Option<ErrorRecord> {
        let removed = self.errors.remove(key);
        self.bump();
        removed
    }

    /// Remove every error on a row. Returns how many were removed.
    pub fn clear_for_row(&mut self, row: usize) -> usize {
        let before = self.errors.len();
        self.errors.retain(|key, _| key.row != row);
        self.bump();
        before - self.errors.len()
    }

    /// Remove every error on a column identity. Returns how many were removed.
    pub fn clear_for_column_identity(&mut self, unique_key: &UniqueKey) -> usize {
        let before = self.errors.len();
        self.errors
            .retain(|key, _| key.unique_key() != Some(unique_key));
        self.bump();
        before - self.errors.len()
    }

    pub fn clear_all(&mut self) {
        self.errors.clear();
        self.bump();
    }

    /// Replace the whole set in one step.
    pub fn bulk_replace(&mut self, errors: ErrorSet) {
        self.errors = errors;
        self.bump();
    }

    /// Plain, JSON-safe copy of the current contents.
    pub fn snapshot(&self) -> ErrorMap {
        encode_set(&self.errors)
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}
