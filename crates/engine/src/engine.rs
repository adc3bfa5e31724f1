//! The validation engine facade.
//!
//! One `ValidationEngine` per grid. It owns the error store and everything
//! that mutates it: per-cell validation, row and column edits, the filter
//! projection, undo/redo and bulk revalidation. The host owns the rows and
//! calls in after each change it makes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use casegrid_core::ColumnDescriptor;
use rustc_hash::FxHashSet;

use crate::bulk::{
    BulkCallbacks, BulkEvent, BulkExecutor, BulkJob, BulkReport, ChunkedExecutor, WorkerExecutor,
    DEFAULT_CHUNK_SIZE,
};
use crate::error::EngineError;
use crate::error_key::{ErrorKey, UniqueKey};
use crate::error_store::{decode_map, upgrade_legacy_keys, ErrorMap, ErrorStore};
use crate::history::{reconcile, restore_errors, GridState, History, HistorySnapshot, DEFAULT_MAX_ENTRIES};
use crate::projection::{FilterView, RowProjection};
use crate::row_ops::{handle_row_deletion, handle_row_insertion, RowDeletion};
use crate::schema::{ColumnSchema, GroupId};
use crate::scheduler::{Clock, SystemClock};
use crate::source::GridSource;
use crate::structural::{apply_structural_change, ColumnEditHint, RemapStats};
use crate::validator::{CellCoord, CellValidator, Evaluation, RuleSet, DEFAULT_DEBOUNCE};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debounce: Duration,
    pub history_limit: usize,
    /// Run bulk revalidation on a background thread.
    pub use_worker: bool,
    pub chunk_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            history_limit: DEFAULT_MAX_ENTRIES,
            use_worker: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct ActiveJob {
    id: u64,
    callbacks: BulkCallbacks,
    /// Cells validated individually while the job ran; their live state wins.
    touched: FxHashSet<ErrorKey>,
}

pub struct ValidationEngine {
    store: ErrorStore,
    schema: ColumnSchema,
    /// Schema before the last `update_column_schema`, until a remap consumes it.
    previous_schema: Option<ColumnSchema>,
    validator: CellValidator,
    projection: RowProjection,
    history: History,
    executor: Box<dyn BulkExecutor>,
    rules: Arc<dyn RuleSet>,
    clock: Box<dyn Clock>,
    chunk_size: usize,
    /// Bumped on every structural edit; bulk results from older generations are discarded.
    generation: u64,
    next_job: u64,
    active: Option<ActiveJob>,
    destroyed: bool,
}

impl ValidationEngine {
    pub fn new(rules: Arc<dyn RuleSet>, columns: Vec<ColumnDescriptor>, options: EngineOptions) -> Self {
        let executor: Box<dyn BulkExecutor> = if options.use_worker {
            Box::new(WorkerExecutor::new())
        } else {
            Box::new(ChunkedExecutor::new())
        };
        Self {
            store: ErrorStore::new(),
            schema: ColumnSchema::new(columns),
            previous_schema: None,
            validator: CellValidator::new(rules.clone(), options.debounce),
            projection: RowProjection::new(),
            history: History::with_limit(options.history_limit),
            executor,
            rules,
            clock: Box::new(SystemClock),
            chunk_size: options.chunk_size.max(1),
            generation: 0,
            next_job: 1,
            active: None,
            destroyed: false,
        }
    }

    /// Replace the clock that drives debounce deadlines.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &ErrorStore {
        &self.store
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn projection(&self) -> &RowProjection {
        &self.projection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn guard(&self, op: &str) -> bool {
        if self.destroyed {
            log::warn!("{} called on a destroyed engine; ignoring", op);
        }
        !self.destroyed
    }

    fn key_at(&self, row: usize, col: usize) -> Option<ErrorKey> {
        self.schema.unique_key(col).map(|k| ErrorKey::new(row, k.clone()))
    }

    // =========================================================================
    // Per-cell validation
    // =========================================================================

    /// Validate one cell. Blank values and `immediate` requests are evaluated
    /// now; anything else waits out the debounce window.
    pub fn validate_cell(&mut self, row: usize, col: usize, value: &str, immediate: bool) -> Evaluation {
        if !self.guard("validate_cell") {
            return Evaluation::Skipped;
        }
        let Some(column) = self.schema.column(col) else {
            log::debug!("validate_cell: column {} not in schema", col);
            return Evaluation::Skipped;
        };
        if !column.accepts_input() {
            log::debug!("validate_cell: column {} does not accept input", col);
            return Evaluation::Skipped;
        }
        let column_type = column.column_type;
        if let (Some(active), Some(key)) = (self.active.as_mut(), self.schema.unique_key(col)) {
            active.touched.insert(ErrorKey::new(row, key.clone()));
        }
        let now = self.clock.now();
        self.validator.validate_cell(
            &mut self.store,
            &self.schema,
            CellCoord::new(row, col),
            value,
            column_type,
            immediate,
            now,
        )
    }

    /// Run every debounced evaluation whose window has closed.
    pub fn tick(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        let now = self.clock.now();
        self.validator.run_due(&mut self.store, &self.schema, now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.validator.next_deadline()
    }

    pub fn pending_count(&self) -> usize {
        self.validator.pending_count()
    }

    /// Evaluate every pending cell now.
    pub fn flush_pending(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        self.validator.flush(&mut self.store, &self.schema)
    }

    // =========================================================================
    // Schema and structural edits
    // =========================================================================

    /// Install the schema the host has just switched to. Must precede the
    /// matching `handle_column_*` call.
    pub fn update_column_schema(&mut self, columns: Vec<ColumnDescriptor>) {
        if !self.guard("update_column_schema") {
            return;
        }
        let next = ColumnSchema::new(columns);
        if next == self.schema {
            return;
        }
        // Pending work targets positions in the outgoing schema
        self.validator.flush(&mut self.store, &self.schema);

        let old = std::mem::replace(&mut self.schema, next);
        if self.previous_schema.is_none() {
            self.previous_schema = Some(old);
        }
        self.structure_changed();
    }

    /// Remap errors after columns were inserted into `group` at `position`.
    pub fn handle_column_addition(&mut self, group: GroupId, position: usize, source: &dyn GridSource) -> RemapStats {
        let hint = ColumnEditHint::Inserted { group, position };
        self.remap_structure("handle_column_addition", Some(&hint), source)
    }

    /// Remap errors after the members at `cell_indices` were deleted from `group`.
    pub fn handle_column_deletion(
        &mut self,
        group: GroupId,
        cell_indices: &[usize],
        source: &dyn GridSource,
    ) -> RemapStats {
        let hint = ColumnEditHint::Deleted { group, cell_indices: cell_indices.to_vec() };
        self.remap_structure("handle_column_deletion", Some(&hint), source)
    }

    /// Remap errors after an arbitrary schema change, assuming tail edits.
    pub fn handle_schema_change(&mut self, source: &dyn GridSource) -> RemapStats {
        self.remap_structure("handle_schema_change", None, source)
    }

    fn remap_structure(&mut self, op: &str, hint: Option<&ColumnEditHint>, source: &dyn GridSource) -> RemapStats {
        if !self.guard(op) {
            return RemapStats::default();
        }
        let Some(previous) = self.previous_schema.take() else {
            log::warn!("{} without a preceding update_column_schema; nothing to remap", op);
            return RemapStats::default();
        };
        self.structure_changed();
        apply_structural_change(&mut self.store, &previous, &self.schema, hint, source.rows())
    }

    pub fn handle_row_addition(&mut self, start: usize, count: usize) {
        if !self.guard("handle_row_addition") || count == 0 {
            return;
        }
        handle_row_insertion(&mut self.store, start, count);
        self.validator.shift_rows_inserted(start, count);
        self.projection.record_row_insertion(start, count);
        self.structure_changed();
    }

    pub fn handle_row_deletion(&mut self, rows: &[usize]) {
        let deletion = RowDeletion::new(rows);
        if !self.guard("handle_row_deletion") || deletion.is_empty() {
            return;
        }
        handle_row_deletion(&mut self.store, &deletion);
        self.validator.shift_rows_deleted(&deletion);
        self.projection.record_row_deletion(&deletion);
        self.structure_changed();
    }

    fn structure_changed(&mut self) {
        if self.cancel_bulk() {
            log::debug!("structural edit cancelled the running bulk job");
        }
        self.generation += 1;
    }

    // =========================================================================
    // Clearing and queries
    // =========================================================================

    pub fn clear_errors_for_cell(&mut self, row: usize, col: usize) {
        if !self.guard("clear_errors_for_cell") {
            return;
        }
        self.validator.cancel_cell(CellCoord::new(row, col));
        if let Some(key) = self.key_at(row, col) {
            if self.store.contains(&key) {
                self.store.remove(&key);
            }
        }
    }

    pub fn clear_errors_for_row(&mut self, row: usize) -> usize {
        if !self.guard("clear_errors_for_row") {
            return 0;
        }
        self.validator.cancel_row(row);
        self.store.clear_for_row(row)
    }

    pub fn clear_errors_for_column(&mut self, col: usize) -> usize {
        if !self.guard("clear_errors_for_column") {
            return 0;
        }
        self.validator.cancel_column(col);
        match self.schema.unique_key(col).cloned() {
            Some(key) => self.store.clear_for_column_identity(&key),
            None => 0,
        }
    }

    pub fn clear_all_errors(&mut self) {
        if !self.guard("clear_all_errors") {
            return;
        }
        self.validator.cancel_all();
        self.store.clear_all();
    }

    pub fn get_error_message(&self, row: usize, col: usize) -> Option<&str> {
        let key = self.key_at(row, col)?;
        self.store.get(&key).map(|r| r.message.as_str())
    }

    pub fn has_error(&self, row: usize, col: usize) -> bool {
        self.get_error_message(row, col).is_some()
    }

    pub fn error_count(&self) -> usize {
        self.store.len()
    }

    pub fn errors_in_row(&self, row: usize) -> usize {
        self.store.iter().filter(|(k, _)| k.row == row).count()
    }

    /// Error count per column identity.
    pub fn errors_by_column(&self) -> Vec<(UniqueKey, usize)> {
        (0..self.schema.len())
            .filter_map(|pos| self.schema.unique_key(pos))
            .filter_map(|key| {
                let n = self.store.iter().filter(|(k, _)| k.unique_key() == Some(key)).count();
                (n > 0).then(|| (key.clone(), n))
            })
            .collect()
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    pub fn apply_filter(&mut self, view: FilterView) {
        if self.guard("apply_filter") {
            self.projection.set_view(view);
        }
    }

    pub fn clear_filter(&mut self) {
        if self.guard("clear_filter") {
            self.projection.clear_filter();
        }
    }

    pub fn is_error_visible(&self, row: usize) -> bool {
        self.projection.is_error_visible(row)
    }

    pub fn get_visible_errors(&self) -> ErrorMap {
        self.projection.get_visible_errors(&self.store)
    }

    pub fn get_remapped_errors(&self, errors: &ErrorMap) -> ErrorMap {
        self.projection.get_remapped_errors(errors)
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Snapshot `grid` and the current errors. Call before the guarded mutation.
    pub fn capture_snapshot(&mut self, label: &str, grid: &GridState) {
        if !self.guard("capture_snapshot") {
            return;
        }
        let snapshot = HistorySnapshot::new(label, grid.clone(), self.store.snapshot());
        self.history.capture(snapshot);
    }

    pub fn can_undo(&self) -> bool {
        !self.destroyed && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.destroyed && self.history.can_redo()
    }

    /// Restore the previous snapshot. Returns the grid the host must install.
    pub fn undo(&mut self, current: &GridState) -> Option<GridState> {
        if !self.guard("undo") || !self.history.can_undo() {
            return None;
        }
        self.flush_pending();
        let label = self.history.undo_label().unwrap_or_default().to_string();
        let here = HistorySnapshot::new(label, current.clone(), self.store.snapshot());
        let snapshot = self.history.undo(here)?;
        Some(self.restore(snapshot, current))
    }

    /// Re-apply the last undone snapshot.
    pub fn redo(&mut self, current: &GridState) -> Option<GridState> {
        if !self.guard("redo") || !self.history.can_redo() {
            return None;
        }
        self.flush_pending();
        let here = HistorySnapshot::new("redo", current.clone(), self.store.snapshot());
        let snapshot = self.history.redo(here)?;
        Some(self.restore(snapshot, current))
    }

    fn restore(&mut self, snapshot: HistorySnapshot, current: &GridState) -> GridState {
        self.on_teardown();

        let restored_schema = snapshot.grid.schema();
        let current_schema = current.schema();
        let restored = restore_errors(&snapshot, &restored_schema);
        let merged = reconcile(
            restored,
            self.store.errors(),
            &snapshot.grid,
            &restored_schema,
            current,
            &current_schema,
        );
        self.store.bulk_replace(merged);

        self.schema = restored_schema;
        self.previous_schema = None;
        self.projection.set_view(snapshot.grid.filter.to_view());
        self.generation += 1;
        log::debug!("restored snapshot '{}'", snapshot.label);
        snapshot.grid
    }

    // =========================================================================
    // Bulk revalidation
    // =========================================================================

    /// Start re-checking every cell of `source`. Returns the job id.
    pub fn revalidate_all(&mut self, source: &dyn GridSource, callbacks: BulkCallbacks) -> Option<u64> {
        if !self.guard("revalidate_all") {
            return None;
        }
        self.cancel_bulk();
        let id = self.next_job;
        self.next_job += 1;

        let job = BulkJob::prepare(id, self.generation, source, &self.schema, self.chunk_size);
        log::debug!("bulk job {} prepared with {} cells", id, job.total());
        self.executor.start(job, self.rules.clone());
        self.active = Some(ActiveJob {
            id,
            callbacks,
            touched: FxHashSet::default(),
        });
        Some(id)
    }

    /// Advance the running job by one step. Returns true while it is running.
    pub fn pump_bulk(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.drive(false);
        self.is_bulk_running()
    }

    /// Run or wait for the running job to finish.
    pub fn wait_bulk(&mut self) {
        while !self.destroyed && self.is_bulk_running() {
            self.drive(true);
        }
    }

    pub fn is_bulk_running(&self) -> bool {
        self.active.is_some() && self.executor.is_running()
    }

    /// Cancel the running job, if any. Returns whether one was running.
    pub fn cancel_bulk(&mut self) -> bool {
        let had_job = self.active.take().is_some();
        self.executor.cancel() || had_job
    }

    fn drive(&mut self, block: bool) {
        for event in self.executor.pump(block) {
            self.handle_bulk_event(event);
        }
        if !self.executor.is_running() {
            self.active = None;
        }
    }

    fn handle_bulk_event(&mut self, event: BulkEvent) {
        let Some(mut active) = self.active.take() else {
            log::debug!("discarding bulk event with no active job");
            return;
        };
        match event {
            BulkEvent::Progress { job, done, total } if job == active.id => {
                active.callbacks.progress(done, total);
            }
            BulkEvent::Failed { job, failure } if job == active.id => {
                log::warn!("bulk validation of {} failed: {}", failure.key, failure.error);
                active.callbacks.error(&failure);
            }
            BulkEvent::Completed(report) if report.job == active.id => {
                self.finish_job(&mut active, report);
                return;
            }
            BulkEvent::Aborted { job, error } if job == active.id => {
                log::warn!("bulk job {} aborted: {}", job, error);
                return;
            }
            other => log::debug!("discarding event for an inactive bulk job: {:?}", other),
        }
        self.active = Some(active);
    }

    fn finish_job(&mut self, active: &mut ActiveJob, report: BulkReport) {
        if report.generation != self.generation {
            let stale = EngineError::StaleJob {
                job: report.job,
                generation: report.generation,
                current: self.generation,
            };
            log::debug!("{}; result discarded", stale);
            return;
        }

        let mut errors = report.errors.clone();
        let live: Vec<&ErrorKey> = report.failed.iter().chain(active.touched.iter()).collect();
        for key in live {
            errors.remove(key);
            if let Some(record) = self.store.get(key) {
                errors.insert(key.clone(), record.clone());
            }
        }
        log::info!(
            "bulk job {} finished: {} cells, {} errors, {} failures",
            report.job,
            report.evaluated,
            errors.len(),
            report.failed.len()
        );
        self.store.bulk_replace(errors);
        active.callbacks.complete(&report);
    }

    // =========================================================================
    // Persistence and lifecycle
    // =========================================================================

    /// Replace the store with a persisted map. Legacy keys are upgraded
    /// against the current schema.
    pub fn load_errors(&mut self, map: &ErrorMap) {
        if !self.guard("load_errors") {
            return;
        }
        let set = upgrade_legacy_keys(decode_map(map), &self.schema);
        self.store.bulk_replace(set);
    }

    pub fn load_errors_json(&mut self, json: &str) -> Result<(), EngineError> {
        let map: ErrorMap = serde_json::from_str(json)?;
        self.load_errors(&map);
        Ok(())
    }

    pub fn export_errors(&self) -> ErrorMap {
        self.store.snapshot()
    }

    pub fn export_errors_json(&self) -> Result<String, EngineError> {
        self.store.to_json()
    }

    /// Cancel pending evaluations and bulk work. Recorded errors are kept.
    pub fn on_teardown(&mut self) {
        let cancelled = self.validator.cancel_all();
        if cancelled > 0 {
            log::debug!("teardown cancelled {} pending evaluation(s)", cancelled);
        }
        self.cancel_bulk();
    }

    /// Release everything. Every later call is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.on_teardown();
        self.store.clear_all();
        self.history.clear();
        self.projection = RowProjection::new();
        self.previous_schema = None;
        self.destroyed = true;
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("errors", &self.store.len())
            .field("columns", &self.schema.len())
            .field("pending", &self.validator.pending_count())
            .field("generation", &self.generation)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
