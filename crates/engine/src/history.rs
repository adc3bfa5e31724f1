//! Undo/redo snapshots with error reconciliation.
//!
//! A snapshot is a deep copy of the grid and the error store, captured before
//! the mutation it guards. Restoring one replaces both, then carries forward
//! any error recorded after capture for a cell whose value is the same on both
//! sides (a debounced evaluation that landed late).

use std::collections::{BTreeMap, VecDeque};

use casegrid_core::{CaseRow, ColumnDescriptor};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error_store::{decode_map, upgrade_legacy_keys, ErrorMap, ErrorSet};
use crate::projection::FilterState;
use crate::schema::ColumnSchema;

pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Host settings toggles carried through history (e.g. "showConfirmedCase").
pub type SettingsFlags = BTreeMap<String, bool>;

/// Everything about the grid a snapshot restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridState {
    #[serde(default)]
    pub rows: Vec<CaseRow>,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub settings: SettingsFlags,
    #[serde(default)]
    pub filter: FilterState,
    #[serde(default)]
    pub schema_version: u32,
}

impl GridState {
    pub fn new(rows: Vec<CaseRow>, columns: Vec<ColumnDescriptor>) -> Self {
        Self { rows, columns, ..Default::default() }
    }

    pub fn schema(&self) -> ColumnSchema {
        ColumnSchema::new(self.columns.clone())
    }
}

#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub grid: GridState,
    pub errors: ErrorMap,
    pub label: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HistorySnapshot {
    pub fn new(label: impl Into<String>, grid: GridState, errors: ErrorMap) -> Self {
        Self {
            grid,
            errors,
            label: label.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

pub struct History {
    undo_stack: VecDeque<HistorySnapshot>,
    redo_stack: Vec<HistorySnapshot>,
    max_entries: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limit(max_entries: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Push a snapshot of the state about to be mutated. Clears redo.
    pub fn capture(&mut self, snapshot: HistorySnapshot) {
        self.undo_stack.push_back(snapshot);
        self.redo_stack.clear();

        // Limit history size
        while self.undo_stack.len() > self.max_entries {
            self.undo_stack.pop_front();
        }
    }

    /// Pop the snapshot to restore; `current` becomes the redo entry.
    pub fn undo(&mut self, current: HistorySnapshot) -> Option<HistorySnapshot> {
        let entry = self.undo_stack.pop_back()?;
        self.redo_stack.push(current);
        Some(entry)
    }

    /// Pop the snapshot to re-apply; `current` becomes the undo entry.
    pub fn redo(&mut self, current: HistorySnapshot) -> Option<HistorySnapshot> {
        let entry = self.redo_stack.pop()?;
        self.undo_stack.push_back(current);
        Some(entry)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(|s| s.label.as_str())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

/// Decode a snapshot's error map against the snapshot's own schema.
pub fn restore_errors(snapshot: &HistorySnapshot, schema: &ColumnSchema) -> ErrorSet {
    upgrade_legacy_keys(decode_map(&snapshot.errors), schema)
}

/// Merge a restored error set with the pre-restore errors that still apply.
///
/// A pre-restore key is carried forward when it is absent from `restored`,
/// resolves to a column in both schemas, and the cell holds the same value in
/// the pre-restore rows and the restored rows.
pub fn reconcile(
    restored: ErrorSet,
    pre_restore: &ErrorSet,
    restored_grid: &GridState,
    restored_schema: &ColumnSchema,
    current_grid: &GridState,
    current_schema: &ColumnSchema,
) -> ErrorSet {
    let mut merged = restored;
    let mut carried = 0usize;

    for (key, record) in pre_restore {
        if merged.contains_key(key) {
            continue;
        }
        let (Some((restored_col, _)), Some((current_col, _))) =
            (restored_schema.resolve_key(key), current_schema.resolve_key(key))
        else {
            continue;
        };
        let restored_value = restored_grid.rows.get(key.row).and_then(|r| r.value(restored_col));
        let current_value = current_grid.rows.get(key.row).and_then(|r| r.value(current_col));
        if restored_value.is_some() && restored_value == current_value {
            merged.insert(key.clone(), record.clone());
            carried += 1;
        }
    }

    if carried > 0 {
        log::debug!("carried {} error(s) across history restore", carried);
    }
    merged
}
