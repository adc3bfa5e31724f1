//! Per-cell validation with debounce coalescing.
//!
//! Each `(row, col)` has at most one pending evaluation. A new request for a
//! cell always replaces the pending one, so only the latest value is ever
//! evaluated. Blank values and `immediate` requests skip the wait entirely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use casegrid_core::{is_blank, ColumnType};

use crate::error::RuleError;
use crate::error_key::ErrorKey;
use crate::error_store::ErrorStore;
use crate::row_ops::{shift_row_for_deletion, shift_row_for_insertion, RowDeletion};
use crate::scheduler::TaskRegistry;
use crate::schema::ColumnSchema;

/// Default debounce window between the last keystroke and evaluation.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Outcome of applying a rule to one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub message: String,
}

impl Verdict {
    pub fn valid() -> Self {
        Self { valid: true, message: String::new() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self { valid: false, message: message.into() }
    }
}

/// The injected rule table. Pure: the same input always gives the same verdict.
pub trait RuleSet: Send + Sync {
    fn evaluate(&self, value: &str, column_type: ColumnType) -> Result<Verdict, RuleError>;
}

impl<F> RuleSet for F
where
    F: Fn(&str, ColumnType) -> Result<Verdict, RuleError> + Send + Sync,
{
    fn evaluate(&self, value: &str, column_type: ColumnType) -> Result<Verdict, RuleError> {
        self(value, column_type)
    }
}

/// A cell addressed by rendered position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub row: usize,
    pub col: usize,
}

impl CellCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone)]
pub struct PendingValidation {
    pub value: String,
    pub column_type: ColumnType,
}

/// What happened to one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Deferred until the debounce window closes.
    Scheduled,
    /// Value is invalid; an error was recorded.
    Recorded,
    /// Value is valid; any error on the cell was removed.
    Cleared,
    /// Column could not be resolved in the live schema.
    Skipped,
    /// The rule set failed; the store was left untouched.
    Failed(RuleError),
}

pub struct CellValidator {
    rules: Arc<dyn RuleSet>,
    debounce: Duration,
    pending: TaskRegistry<CellCoord, PendingValidation>,
}

impl std::fmt::Debug for CellValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellValidator")
            .field("debounce", &self.debounce)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl CellValidator {
    pub fn new(rules: Arc<dyn RuleSet>, debounce: Duration) -> Self {
        Self {
            rules,
            debounce,
            pending: TaskRegistry::new(),
        }
    }

    pub fn rules(&self) -> &Arc<dyn RuleSet> {
        &self.rules
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, coord: CellCoord) -> bool {
        self.pending.contains(&coord)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// Request validation of one cell.
    ///
    /// Any pending evaluation for the same cell is cancelled first.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_cell(
        &mut self,
        store: &mut ErrorStore,
        schema: &ColumnSchema,
        coord: CellCoord,
        value: &str,
        column_type: ColumnType,
        immediate: bool,
        now: Instant,
    ) -> Evaluation {
        self.pending.cancel(&coord);

        if immediate || is_blank(value) {
            return self.evaluate(store, schema, coord, value, column_type);
        }

        self.pending.schedule(
            coord,
            now + self.debounce,
            PendingValidation {
                value: value.to_string(),
                column_type,
            },
        );
        Evaluation::Scheduled
    }

    /// Run every evaluation whose window has closed. Returns how many ran.
    pub fn run_due(&mut self, store: &mut ErrorStore, schema: &ColumnSchema, now: Instant) -> usize {
        let due = self.pending.take_due(now);
        let n = due.len();
        for (coord, task) in due {
            self.evaluate(store, schema, coord, &task.value, task.column_type);
        }
        n
    }

    /// Run every pending evaluation now. Returns how many ran.
    pub fn flush(&mut self, store: &mut ErrorStore, schema: &ColumnSchema) -> usize {
        let all = self.pending.drain();
        let n = all.len();
        for (coord, task) in all {
            self.evaluate(store, schema, coord, &task.value, task.column_type);
        }
        n
    }

    pub fn cancel_cell(&mut self, coord: CellCoord) -> bool {
        self.pending.cancel(&coord).is_some()
    }

    pub fn cancel_row(&mut self, row: usize) {
        self.pending.rekey(|c| (c.row != row).then_some(*c));
    }

    pub fn cancel_column(&mut self, col: usize) {
        self.pending.rekey(|c| (c.col != col).then_some(*c));
    }

    /// Cancel every pending evaluation. Returns how many were pending.
    pub fn cancel_all(&mut self) -> usize {
        self.pending.clear()
    }

    /// Follow a row insertion so pending work still targets the same records.
    pub fn shift_rows_inserted(&mut self, start: usize, count: usize) {
        self.pending.rekey(|c| {
            shift_row_for_insertion(c.row, start, count).map(|row| CellCoord::new(row, c.col))
        });
    }

    /// Follow a row deletion. Work pending on deleted rows is cancelled.
    pub fn shift_rows_deleted(&mut self, deletion: &RowDeletion) {
        self.pending.rekey(|c| {
            shift_row_for_deletion(c.row, deletion).map(|row| CellCoord::new(row, c.col))
        });
    }

    fn evaluate(
        &self,
        store: &mut ErrorStore,
        schema: &ColumnSchema,
        coord: CellCoord,
        value: &str,
        column_type: ColumnType,
    ) -> Evaluation {
        let Some(unique) = schema.unique_key(coord.col) else {
            log::debug!("column {} not in schema, skipping validation of row {}", coord.col, coord.row);
            return Evaluation::Skipped;
        };
        let key = ErrorKey::new(coord.row, unique.clone());

        match self.rules.evaluate(value, column_type) {
            Ok(verdict) if verdict.valid => {
                if store.contains(&key) {
                    store.remove(&key);
                }
                Evaluation::Cleared
            }
            Ok(verdict) => {
                store.add(key, verdict.message);
                Evaluation::Recorded
            }
            Err(e) => {
                log::warn!("validation of {} failed: {}", key, e);
                Evaluation::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use casegrid_core::ColumnDescriptor;

    use crate::scheduler::{Clock, ManualClock};

    fn binary_rule(value: &str, _t: ColumnType) -> Result<Verdict, RuleError> {
        match value.trim() {
            "" | "0" | "1" => Ok(Verdict::valid()),
            _ => Ok(Verdict::invalid("must be 0 or 1")),
        }
    }

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDescriptor::serial(),
            ColumnDescriptor::group_member(ColumnType::Clinical, 0),
            ColumnDescriptor::group_member(ColumnType::Clinical, 1),
        ])
    }

    fn key(row: usize, col: usize) -> ErrorKey {
        ErrorKey::new(row, schema().unique_key(col).unwrap().clone())
    }

    #[test]
    fn test_immediate_records_and_clears() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let clock = ManualClock::new();
        let s = schema();

        let r = v.validate_cell(&mut store, &s, CellCoord::new(0, 1), "7", ColumnType::Clinical, true, clock.now());
        assert_eq!(r, Evaluation::Recorded);
        assert_eq!(store.get(&key(0, 1)).unwrap().message, "must be 0 or 1");

        let r = v.validate_cell(&mut store, &s, CellCoord::new(0, 1), "1", ColumnType::Clinical, true, clock.now());
        assert_eq!(r, Evaluation::Cleared);
        assert!(store.is_empty());
    }

    #[test]
    fn test_debounced_until_due() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let clock = ManualClock::new();
        let s = schema();

        let r = v.validate_cell(&mut store, &s, CellCoord::new(2, 2), "x", ColumnType::Clinical, false, clock.now());
        assert_eq!(r, Evaluation::Scheduled);
        assert!(store.is_empty());

        clock.advance(Duration::from_millis(299));
        assert_eq!(v.run_due(&mut store, &s, clock.now()), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(v.run_due(&mut store, &s, clock.now()), 1);
        assert!(store.contains(&key(2, 2)));
    }

    #[test]
    fn test_coalescing_uses_latest_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, sn) = (calls.clone(), seen.clone());
        let rule = move |value: &str, t: ColumnType| {
            c.fetch_add(1, Ordering::SeqCst);
            sn.lock().unwrap().push(value.to_string());
            binary_rule(value, t)
        };
        let mut v = CellValidator::new(Arc::new(rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let clock = ManualClock::new();
        let s = schema();
        let cell = CellCoord::new(0, 1);

        v.validate_cell(&mut store, &s, cell, "5", ColumnType::Clinical, false, clock.now());
        clock.advance(Duration::from_millis(100));
        v.validate_cell(&mut store, &s, cell, "9", ColumnType::Clinical, false, clock.now());
        assert_eq!(v.pending_count(), 1);

        clock.advance(Duration::from_secs(1));
        v.run_due(&mut store, &s, clock.now());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["9".to_string()]);
    }

    #[test]
    fn test_blank_value_is_immediate_and_cancels_pending() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let clock = ManualClock::new();
        let s = schema();
        let cell = CellCoord::new(1, 1);

        v.validate_cell(&mut store, &s, cell, "bad", ColumnType::Clinical, true, clock.now());
        v.validate_cell(&mut store, &s, cell, "worse", ColumnType::Clinical, false, clock.now());
        assert!(v.is_pending(cell));

        let r = v.validate_cell(&mut store, &s, cell, "  ", ColumnType::Clinical, false, clock.now());
        assert_eq!(r, Evaluation::Cleared);
        assert!(!v.is_pending(cell));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_column_is_skipped() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let r = v.validate_cell(&mut store, &schema(), CellCoord::new(0, 40), "x", ColumnType::Clinical, true, Instant::now());
        assert_eq!(r, Evaluation::Skipped);
        assert!(store.is_empty());
    }

    #[test]
    fn test_rule_failure_leaves_store_alone() {
        let failing = |_: &str, _: ColumnType| -> Result<Verdict, RuleError> { Err(RuleError::new("boom")) };
        let mut v = CellValidator::new(Arc::new(failing), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        store.add(key(0, 1), "old");
        let r = v.validate_cell(&mut store, &schema(), CellCoord::new(0, 1), "x", ColumnType::Clinical, true, Instant::now());
        assert!(matches!(r, Evaluation::Failed(_)));
        assert_eq!(store.get(&key(0, 1)).unwrap().message, "old");
    }

    #[test]
    fn test_pending_follows_row_edits() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let now = Instant::now();
        let s = schema();
        v.validate_cell(&mut store, &s, CellCoord::new(1, 1), "x", ColumnType::Clinical, false, now);
        v.validate_cell(&mut store, &s, CellCoord::new(3, 1), "y", ColumnType::Clinical, false, now);

        v.shift_rows_inserted(2, 2);
        assert!(v.is_pending(CellCoord::new(1, 1)));
        assert!(v.is_pending(CellCoord::new(5, 1)));

        v.shift_rows_deleted(&RowDeletion::new(&[1]));
        assert!(!v.is_pending(CellCoord::new(1, 1)));
        assert!(v.is_pending(CellCoord::new(4, 1)));
        assert_eq!(v.pending_count(), 1);
    }

    #[test]
    fn test_flush_and_cancel_all() {
        let mut v = CellValidator::new(Arc::new(binary_rule), DEFAULT_DEBOUNCE);
        let mut store = ErrorStore::new();
        let now = Instant::now();
        let s = schema();
        v.validate_cell(&mut store, &s, CellCoord::new(0, 1), "x", ColumnType::Clinical, false, now);
        assert_eq!(v.flush(&mut store, &s), 1);
        assert_eq!(store.len(), 1);

        v.validate_cell(&mut store, &s, CellCoord::new(0, 2), "x", ColumnType::Clinical, false, now);
        assert_eq!(v.cancel_all(), 1);
        assert_eq!(v.flush(&mut store, &s), 0);
        assert_eq!(store.len(), 1);
    }
}
