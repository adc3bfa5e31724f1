//! Bulk revalidation.
//!
//! A job evaluates every cell of the grid in fixed-size chunks. Two executors
//! share one interface: `ChunkedExecutor` runs one chunk per `pump` on the
//! caller's thread; `WorkerExecutor` runs the whole job on a background thread
//! and reports through a channel. Neither touches the error store: the engine
//! merges a completed job's result only if the grid has not changed shape
//! since the job was prepared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use casegrid_core::ColumnType;

use crate::error::{EngineError, RuleError};
use crate::error_key::{ErrorKey, UniqueKey};
use crate::error_store::{ErrorRecord, ErrorSet};
use crate::schema::ColumnSchema;
use crate::source::GridSource;
use crate::validator::RuleSet;

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Shared cancellation flag, checked between chunks.
pub type CancelToken = Arc<AtomicBool>;

/// One cell to evaluate.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub row: usize,
    pub col: usize,
    pub key: UniqueKey,
    pub value: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone)]
pub struct BulkJob {
    pub id: u64,
    /// Structure generation the items were read under.
    pub generation: u64,
    pub items: Vec<BulkItem>,
    pub chunk_size: usize,
}

impl BulkJob {
    /// Collect every non-serial cell of the grid.
    pub fn prepare(
        id: u64,
        generation: u64,
        source: &dyn GridSource,
        schema: &ColumnSchema,
        chunk_size: usize,
    ) -> Self {
        let mut items = Vec::with_capacity(source.row_count() * schema.len());
        for row in 0..source.row_count() {
            for (col, column) in schema.columns().iter().enumerate() {
                if !column.accepts_input() {
                    continue;
                }
                let Some(key) = schema.unique_key(col) else { continue };
                items.push(BulkItem {
                    row,
                    col,
                    key: key.clone(),
                    value: source.cell_value(row, column).unwrap_or_default().to_string(),
                    column_type: column.column_type,
                });
            }
        }
        Self {
            id,
            generation,
            items,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// A cell whose rule evaluation failed.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub row: usize,
    pub col: usize,
    pub key: ErrorKey,
    pub error: RuleError,
}

#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub job: u64,
    pub generation: u64,
    /// Every error found, keyed for the store.
    pub errors: ErrorSet,
    pub evaluated: usize,
    /// Cells whose evaluation failed; their previous state is unknown to the job.
    pub failed: Vec<ErrorKey>,
}

#[derive(Debug)]
pub enum BulkEvent {
    Progress { job: u64, done: usize, total: usize },
    Failed { job: u64, failure: ItemFailure },
    Completed(BulkReport),
    Aborted { job: u64, error: EngineError },
}

/// Host callbacks for one job.
#[derive(Default)]
pub struct BulkCallbacks {
    on_progress: Option<Box<dyn FnMut(usize, usize)>>,
    on_error: Option<Box<dyn FnMut(&ItemFailure)>>,
    on_complete: Option<Box<dyn FnMut(&BulkReport)>>,
}

impl BulkCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(usize, usize) + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&ItemFailure) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut(&BulkReport) + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub(crate) fn progress(&mut self, done: usize, total: usize) {
        if let Some(f) = self.on_progress.as_mut() {
            f(done, total);
        }
    }

    pub(crate) fn error(&mut self, failure: &ItemFailure) {
        if let Some(f) = self.on_error.as_mut() {
            f(failure);
        }
    }

    pub(crate) fn complete(&mut self, report: &BulkReport) {
        if let Some(f) = self.on_complete.as_mut() {
            f(report);
        }
    }
}

impl std::fmt::Debug for BulkCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Runs bulk jobs. At most one job is active per executor.
pub trait BulkExecutor {
    /// Start `job`, cancelling any job still running.
    fn start(&mut self, job: BulkJob, rules: Arc<dyn RuleSet>);

    /// Collect events. With `block`, run or wait until the job finishes.
    fn pump(&mut self, block: bool) -> Vec<BulkEvent>;

    /// Cancel the active job. Its remaining events are discarded.
    fn cancel(&mut self) -> bool;

    fn is_running(&self) -> bool;
}

/// Evaluate one chunk into `report`, emitting failures.
fn run_chunk(
    items: &[BulkItem],
    rules: &dyn RuleSet,
    report: &mut BulkReport,
    mut emit: impl FnMut(BulkEvent),
) {
    for item in items {
        let key = ErrorKey::new(item.row, item.key.clone());
        match rules.evaluate(&item.value, item.column_type) {
            Ok(verdict) => {
                if !verdict.valid {
                    report.errors.insert(key, ErrorRecord::new(verdict.message));
                }
            }
            Err(error) => {
                report.failed.push(key.clone());
                emit(BulkEvent::Failed {
                    job: report.job,
                    failure: ItemFailure { row: item.row, col: item.col, key, error },
                });
            }
        }
        report.evaluated += 1;
    }
}

// =============================================================================
// ChunkedExecutor
// =============================================================================

struct ChunkedRun {
    job: BulkJob,
    rules: Arc<dyn RuleSet>,
    cursor: usize,
    report: BulkReport,
}

impl ChunkedRun {
    fn new(job: BulkJob, rules: Arc<dyn RuleSet>) -> Self {
        let report = BulkReport {
            job: job.id,
            generation: job.generation,
            ..Default::default()
        };
        Self { job, rules, cursor: 0, report }
    }

    /// Run one chunk. Returns true when the job is done.
    fn step(&mut self, events: &mut Vec<BulkEvent>) -> bool {
        let total = self.job.total();
        let end = (self.cursor + self.job.chunk_size).min(total);
        run_chunk(
            &self.job.items[self.cursor..end],
            self.rules.as_ref(),
            &mut self.report,
            |e| events.push(e),
        );
        self.cursor = end;
        events.push(BulkEvent::Progress { job: self.job.id, done: end, total });
        end >= total
    }
}

/// Synchronous executor: one chunk per non-blocking `pump`.
#[derive(Default)]
pub struct ChunkedExecutor {
    run: Option<ChunkedRun>,
}

impl ChunkedExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BulkExecutor for ChunkedExecutor {
    fn start(&mut self, job: BulkJob, rules: Arc<dyn RuleSet>) {
        self.run = Some(ChunkedRun::new(job, rules));
    }

    fn pump(&mut self, block: bool) -> Vec<BulkEvent> {
        let mut events = Vec::new();
        let Some(run) = self.run.as_mut() else {
            return events;
        };
        loop {
            let done = run.step(&mut events);
            if done {
                break;
            }
            if !block {
                return events;
            }
        }
        if let Some(run) = self.run.take() {
            events.push(BulkEvent::Completed(run.report));
        }
        events
    }

    fn cancel(&mut self) -> bool {
        self.run.take().is_some()
    }

    fn is_running(&self) -> bool {
        self.run.is_some()
    }
}

// =============================================================================
// WorkerExecutor
// =============================================================================

struct WorkerRun {
    job: u64,
    rx: mpsc::Receiver<BulkEvent>,
    cancel: CancelToken,
    _handle: thread::JoinHandle<()>,
}

/// Background-thread executor. Falls back to chunked execution on the
/// caller's thread if a worker cannot be started.
#[derive(Default)]
pub struct WorkerExecutor {
    run: Option<WorkerRun>,
    fallback: ChunkedExecutor,
}

impl WorkerExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(job: Arc<BulkJob>, rules: Arc<dyn RuleSet>) -> Result<WorkerRun, EngineError> {
        let (tx, rx) = mpsc::channel();
        let cancel: CancelToken = Arc::new(AtomicBool::new(false));
        let token = cancel.clone();
        let id = job.id;

        let handle = thread::Builder::new()
            .name(format!("casegrid-bulk-{id}"))
            .spawn(move || worker_main(&job, rules.as_ref(), &token, &tx))
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        Ok(WorkerRun { job: id, rx, cancel, _handle: handle })
    }
}

fn worker_main(job: &BulkJob, rules: &dyn RuleSet, cancel: &CancelToken, tx: &mpsc::Sender<BulkEvent>) {
    let total = job.total();
    let mut report = BulkReport {
        job: job.id,
        generation: job.generation,
        ..Default::default()
    };

    for chunk in job.items.chunks(job.chunk_size) {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let mut failures = Vec::new();
        run_chunk(chunk, rules, &mut report, |e| failures.push(e));
        for event in failures {
            if tx.send(event).is_err() {
                return;
            }
        }
        let progress = BulkEvent::Progress { job: job.id, done: report.evaluated, total };
        if tx.send(progress).is_err() {
            return;
        }
    }

    if !cancel.load(Ordering::Relaxed) {
        let _ = tx.send(BulkEvent::Completed(report));
    }
}

impl BulkExecutor for WorkerExecutor {
    fn start(&mut self, job: BulkJob, rules: Arc<dyn RuleSet>) {
        self.cancel();
        let job = Arc::new(job);
        match Self::spawn(job.clone(), rules.clone()) {
            Ok(run) => self.run = Some(run),
            Err(error) => {
                log::warn!("{}; running bulk validation in-process", error);
                let job = Arc::try_unwrap(job).unwrap_or_else(|shared| (*shared).clone());
                self.fallback.start(job, rules);
            }
        }
    }

    fn pump(&mut self, block: bool) -> Vec<BulkEvent> {
        if self.fallback.is_running() {
            return self.fallback.pump(block);
        }
        let mut events = Vec::new();
        let Some(run) = self.run.as_ref() else {
            return events;
        };

        let mut finished = false;
        loop {
            let next = if block {
                run.rx.recv().map_err(|_| mpsc::TryRecvError::Disconnected)
            } else {
                run.rx.try_recv()
            };
            match next {
                Ok(event) => {
                    finished = matches!(event, BulkEvent::Completed(_));
                    events.push(event);
                    if finished {
                        break;
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    events.push(BulkEvent::Aborted {
                        job: run.job,
                        error: EngineError::WorkerDisconnected { job: run.job },
                    });
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            self.run = None;
        }
        events
    }

    fn cancel(&mut self) -> bool {
        let fallback = self.fallback.cancel();
        match self.run.take() {
            Some(run) => {
                run.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => fallback,
        }
    }

    fn is_running(&self) -> bool {
        self.run.is_some() || self.fallback.is_running()
    }
}
