//! Row insertion and deletion.
//!
//! Rows have no identity, so every stored coordinate at or below an edit
//! moves. Insertion and deletion are exact inverses for rows outside the
//! edited range.

use crate::error_store::{ErrorSet, ErrorStore};

/// A normalized set of deleted row indices (sorted, unique).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDeletion {
    rows: Vec<usize>,
}

impl RowDeletion {
    pub fn new(rows: &[usize]) -> Self {
        let mut rows = rows.to_vec();
        rows.sort_unstable();
        rows.dedup();
        Self { rows }
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: usize) -> bool {
        self.rows.binary_search(&row).is_ok()
    }

    /// How many deleted rows sit above `row`.
    pub fn count_below(&self, row: usize) -> usize {
        self.rows.partition_point(|&d| d < row)
    }
}

/// Where `row` lands after `count` rows are inserted at `start`, or `None`
/// if it would be pushed past the addressable range.
pub fn shift_row_for_insertion(row: usize, start: usize, count: usize) -> Option<usize> {
    if row >= start {
        row.checked_add(count)
    } else {
        Some(row)
    }
}

/// Where `row` lands after a deletion, or `None` if it was deleted.
pub fn shift_row_for_deletion(row: usize, deletion: &RowDeletion) -> Option<usize> {
    if deletion.contains(row) {
        None
    } else {
        Some(row - deletion.count_below(row))
    }
}

/// Inverse of `shift_row_for_deletion`: the pre-deletion index of a surviving row.
pub fn unshift_row_for_deletion(row: usize, deletion: &RowDeletion) -> usize {
    let mut original = row;
    for &d in deletion.rows() {
        if d <= original {
            original += 1;
        } else {
            break;
        }
    }
    original
}

/// Shift an error set for inserted rows. Keys shifted out of range are dropped.
pub fn insert_rows(errors: &ErrorSet, start: usize, count: usize) -> ErrorSet {
    errors
        .iter()
        .filter_map(|(key, record)| match shift_row_for_insertion(key.row, start, count) {
            Some(row) => Some((key.with_row(row), record.clone())),
            None => {
                log::debug!("dropping error {}: row index overflows after insertion", key);
                None
            }
        })
        .collect()
}

/// Shift an error set for deleted rows, dropping errors on the deleted rows.
pub fn delete_rows(errors: &ErrorSet, deletion: &RowDeletion) -> ErrorSet {
    errors
        .iter()
        .filter_map(|(key, record)| {
            shift_row_for_deletion(key.row, deletion).map(|row| (key.with_row(row), record.clone()))
        })
        .collect()
}

/// Apply a row insertion to the store.
pub fn handle_row_insertion(store: &mut ErrorStore, start: usize, count: usize) {
    if count == 0 {
        return;
    }
    let shifted = insert_rows(store.errors(), start, count);
    store.bulk_replace(shifted);
}

/// Apply a row deletion to the store.
pub fn handle_row_deletion(store: &mut ErrorStore, deletion: &RowDeletion) {
    if deletion.is_empty() {
        return;
    }
    let shifted = delete_rows(store.errors(), deletion);
    store.bulk_replace(shifted);
}
