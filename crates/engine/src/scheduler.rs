//! Deferred work on a single logical thread.
//!
//! `TaskRegistry` holds at most one scheduled task per key. The host drives it
//! by asking for the tasks that are due at some instant; nothing fires on its
//! own. Each engine owns its registry, so several grids can coexist.

use std::cell::Cell;
use std::hash::Hash;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Source of "now" for deadlines.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

#[derive(Debug, Clone)]
struct ScheduledTask<T> {
    due: Instant,
    /// Scheduling order, breaks ties between equal deadlines.
    seq: u64,
    payload: T,
}

#[derive(Debug, Clone)]
pub struct TaskRegistry<K, T> {
    tasks: FxHashMap<K, ScheduledTask<T>>,
    next_seq: u64,
}

impl<K, T> Default for TaskRegistry<K, T> {
    fn default() -> Self {
        Self {
            tasks: FxHashMap::default(),
            next_seq: 0,
        }
    }
}

impl<K: Eq + Hash + Clone, T> TaskRegistry<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `payload` under `key`, cancelling whatever was pending there.
    /// Returns the cancelled payload.
    pub fn schedule(&mut self, key: K, due: Instant, payload: T) -> Option<T> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks
            .insert(key, ScheduledTask { due, seq, payload })
            .map(|old| old.payload)
    }

    pub fn cancel(&mut self, key: &K) -> Option<T> {
        self.tasks.remove(key).map(|t| t.payload)
    }

    /// Move an existing task's deadline. Returns false if nothing is pending.
    pub fn reschedule(&mut self, key: &K, due: Instant) -> bool {
        match self.tasks.get_mut(key) {
            Some(task) => {
                task.due = due;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.values().map(|t| t.due).min()
    }

    /// Remove and return every task due at or before `now`, oldest deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, T)> {
        let due_keys: Vec<K> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut due: Vec<(K, ScheduledTask<T>)> = due_keys
            .into_iter()
            .filter_map(|k| self.tasks.remove(&k).map(|t| (k, t)))
            .collect();
        due.sort_by_key(|(_, t)| (t.due, t.seq));
        due.into_iter().map(|(k, t)| (k, t.payload)).collect()
    }

    /// Remove and return every pending task regardless of deadline.
    pub fn drain(&mut self) -> Vec<(K, T)> {
        let mut all: Vec<(K, ScheduledTask<T>)> = self.tasks.drain().collect();
        all.sort_by_key(|(_, t)| (t.due, t.seq));
        all.into_iter().map(|(k, t)| (k, t.payload)).collect()
    }

    /// Cancel everything. Returns how many tasks were pending.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    /// Re-key every pending task. Tasks mapped to `None` are cancelled.
    pub fn rekey<F>(&mut self, mut f: F)
    where
        F: FnMut(&K) -> Option<K>,
    {
        let old = std::mem::take(&mut self.tasks);
        for (key, task) in old {
            if let Some(new_key) = f(&key) {
                self.tasks.insert(new_key, task);
            }
        }
    }
}
