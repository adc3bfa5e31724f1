//! Filter row projection.
//!
//! Maps between three row spaces:
//! - Original space: row indices at the time the current filter was applied
//! - Current space: row indices after the row edits recorded since then
//! - Virtual space: position within the filtered view, counting only view
//!   rows that have not been deleted since the filter was applied
//!
//! The error store always speaks current space. The view is captured in
//! original space and is not recomputed on row edits; the host re-applies the
//! filter when it wants inserted rows considered.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error_key::parse_key;
use crate::error_store::{ErrorMap, ErrorStore};
use crate::row_ops::{shift_row_for_deletion, shift_row_for_insertion, unshift_row_for_deletion, RowDeletion};

// =============================================================================
// FilterView
// =============================================================================

/// The rows that survive the active filter, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterView {
    /// virtual row -> original row
    rows: Vec<usize>,
    filtered: bool,
}

impl FilterView {
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn filtered(rows: Vec<usize>) -> Self {
        Self { rows, filtered: true }
    }

    /// Filter `row_count` rows with a predicate over original indices.
    pub fn from_predicate<F>(row_count: usize, mut keep: F) -> Self
    where
        F: FnMut(usize) -> bool,
    {
        Self::filtered((0..row_count).filter(|&r| keep(r)).collect())
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }
}

/// Persistable filter state carried in history snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    /// Visible original rows in display order, `None` when no filter is active.
    #[serde(default)]
    pub view: Option<Vec<usize>>,
    /// Host-defined filter criteria, opaque to the engine.
    #[serde(default)]
    pub criteria: serde_json::Value,
}

impl FilterState {
    pub fn to_view(&self) -> FilterView {
        match &self.view {
            Some(rows) => FilterView::filtered(rows.clone()),
            None => FilterView::unfiltered(),
        }
    }
}

// =============================================================================
// RowProjection
// =============================================================================

/// A row edit recorded since the view was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDelta {
    Inserted { start: usize, count: usize },
    Deleted(RowDeletion),
}

#[derive(Debug, Clone, Default)]
pub struct RowProjection {
    view: FilterView,
    original_to_virtual: FxHashMap<usize, usize>,
    deltas: Vec<RowDelta>,
}

impl RowProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a new filter view. Recorded row edits are folded into it.
    pub fn set_view(&mut self, view: FilterView) {
        self.original_to_virtual = view
            .rows()
            .iter()
            .enumerate()
            .map(|(virt, &orig)| (orig, virt))
            .collect();
        self.view = view;
        self.deltas.clear();
    }

    pub fn clear_filter(&mut self) {
        self.set_view(FilterView::unfiltered());
    }

    pub fn view(&self) -> &FilterView {
        &self.view
    }

    pub fn is_filtered(&self) -> bool {
        self.view.is_filtered()
    }

    pub fn deltas(&self) -> &[RowDelta] {
        &self.deltas
    }

    pub fn filter_state(&self, criteria: serde_json::Value) -> FilterState {
        FilterState {
            view: self.view.is_filtered().then(|| self.view.rows().to_vec()),
            criteria,
        }
    }

    pub fn record_row_insertion(&mut self, start: usize, count: usize) {
        if count > 0 {
            self.deltas.push(RowDelta::Inserted { start, count });
        }
    }

    pub fn record_row_deletion(&mut self, deletion: &RowDeletion) {
        if !deletion.is_empty() {
            self.deltas.push(RowDelta::Deleted(deletion.clone()));
        }
    }

    /// Current index of an original row, or `None` if it has been deleted.
    pub fn original_to_current(&self, original: usize) -> Option<usize> {
        self.deltas.iter().try_fold(original, |row, delta| match delta {
            RowDelta::Inserted { start, count } => shift_row_for_insertion(row, *start, *count),
            RowDelta::Deleted(deletion) => shift_row_for_deletion(row, deletion),
        })
    }

    /// Original index of a current row, or `None` if it was inserted since.
    pub fn current_to_original(&self, current: usize) -> Option<usize> {
        self.deltas.iter().rev().try_fold(current, |row, delta| match delta {
            RowDelta::Inserted { start, count } => {
                if row < *start {
                    Some(row)
                } else if row < start + count {
                    None
                } else {
                    Some(row - count)
                }
            }
            RowDelta::Deleted(deletion) => Some(unshift_row_for_deletion(row, deletion)),
        })
    }

    /// View rows (original indices) that survive the recorded edits, in
    /// display order.
    pub fn live_view_rows(&self) -> Vec<usize> {
        self.view
            .rows()
            .iter()
            .copied()
            .filter(|&row| self.original_to_current(row).is_some())
            .collect()
    }

    /// Display position of an original row. Deleted view rows are closed up.
    pub fn virtual_index(&self, original: usize) -> Option<usize> {
        let pos = *self.original_to_virtual.get(&original)?;
        self.original_to_current(original)?;
        let deleted_before = self.view.rows()[..pos]
            .iter()
            .filter(|&&row| self.original_to_current(row).is_none())
            .count();
        Some(pos - deleted_before)
    }

    /// Whether errors on a current row are shown. Rows inserted since the
    /// filter was applied stay hidden until it is re-applied.
    pub fn is_error_visible(&self, row: usize) -> bool {
        if !self.view.is_filtered() {
            return true;
        }
        self.current_to_original(row)
            .is_some_and(|original| self.original_to_virtual.contains_key(&original))
    }

    /// Errors on visible rows. Rows are virtual indices while a filter is
    /// active and current indices otherwise.
    pub fn get_visible_errors(&self, store: &ErrorStore) -> ErrorMap {
        if !self.view.is_filtered() {
            return store.iter().map(|(key, record)| (key.to_string(), record.clone())).collect();
        }
        let live: FxHashMap<usize, usize> = self
            .live_view_rows()
            .into_iter()
            .enumerate()
            .map(|(virt, original)| (original, virt))
            .collect();

        let mut visible = ErrorMap::new();
        for (key, record) in store.iter() {
            let Some(original) = self.current_to_original(key.row) else {
                continue;
            };
            if let Some(&virt) = live.get(&original) {
                visible.insert(key.with_row(virt).to_string(), record.clone());
            }
        }
        visible
    }

    /// Shift an external map, keyed in original space, through the recorded
    /// row edits. Errors on deleted rows and malformed keys are dropped.
    pub fn get_remapped_errors(&self, errors: &ErrorMap) -> ErrorMap {
        let mut out = ErrorMap::new();
        for (raw, record) in errors {
            let Some(key) = parse_key(raw) else {
                log::debug!("skipping malformed error key '{}'", raw);
                continue;
            };
            if let Some(row) = self.original_to_current(key.row) {
                out.insert(key.with_row(row).to_string(), record.clone());
            }
        }
        out
    }
}
