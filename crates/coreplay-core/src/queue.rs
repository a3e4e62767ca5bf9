//! Debounced outbound variable updates
//!
//! Values pushed by subscription effects are coalesced and written to the
//! sink at most once per interval:
//!
//! 1. `enqueue` records the newest value per variable. A value equal to the
//!    last emitted one cancels the pending write for that variable.
//! 2. The first enqueue after a flush schedules exactly one flush, delayed so
//!    that consecutive flushes are at least `interval` apart.
//! 3. The flush drains everything pending as one batch.
//!
//! The bookkeeping lives in [`DebounceState`], which takes the current time
//! as an argument and never sleeps, so it can be driven by a virtual clock.
//! [`DebouncedQueue`] wraps it with a tokio timer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Variable id -> value
pub type VariableUpdates = BTreeMap<String, Value>;

/// Default spacing between flushes
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Receives flushed batches
///
/// Implementations must tolerate a value identical to the previous one.
pub trait VariableSink: Send + Sync + 'static {
    fn set_variable_values(&self, values: VariableUpdates);
}

/// Anything subscription effects can push updates into
pub trait UpdateQueue {
    fn enqueue(&self, updates: VariableUpdates);
}

/// A variable id with its human-readable name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDefinition {
    pub id: String,
    pub name: String,
}

/// Per-variable emission bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedVariable {
    pub id: String,
    pub name: String,
    /// Most recent value enqueued
    pub current: Value,
    /// Last value handed to the sink; `Null` until the first emission
    pub last_emitted: Value,
    pub last_emitted_at: Option<Instant>,
}

impl TrackedVariable {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            current: Value::Null,
            last_emitted: Value::Null,
            last_emitted_at: None,
        }
    }
}

/// Clock-free debounce bookkeeping
#[derive(Debug)]
pub struct DebounceState {
    interval: Duration,
    variables: BTreeMap<String, TrackedVariable>,
    pending: VariableUpdates,
    last_flush: Option<Instant>,
    flush_scheduled: bool,
}

impl DebounceState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            variables: BTreeMap::new(),
            pending: BTreeMap::new(),
            last_flush: None,
            flush_scheduled: false,
        }
    }

    /// Register a variable up front so it carries a proper name
    pub fn define(&mut self, id: &str, name: &str) {
        self.variables
            .entry(id.to_string())
            .and_modify(|v| v.name = name.to_string())
            .or_insert_with(|| TrackedVariable::new(id, name));
    }

    /// Record updates; returns the delay of a flush that must now be scheduled
    pub fn enqueue(&mut self, updates: VariableUpdates, now: Instant) -> Option<Duration> {
        for (id, value) in updates {
            let variable = self
                .variables
                .entry(id.clone())
                .or_insert_with(|| TrackedVariable::new(&id, "unknown"));
            variable.current = value.clone();

            if variable.last_emitted == value {
                self.pending.remove(&id);
            } else {
                self.pending.insert(id, value);
            }
        }

        if self.flush_scheduled || self.pending.is_empty() {
            return None;
        }

        self.flush_scheduled = true;
        let since_flush = self
            .last_flush
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(self.interval);
        Some(self.interval.saturating_sub(since_flush))
    }

    /// Drain the pending set as one batch
    pub fn flush(&mut self, now: Instant) -> VariableUpdates {
        let batch = std::mem::take(&mut self.pending);
        for (id, value) in &batch {
            if let Some(variable) = self.variables.get_mut(id) {
                variable.last_emitted = value.clone();
                variable.last_emitted_at = Some(now);
            }
        }
        self.last_flush = Some(now);
        self.flush_scheduled = false;
        batch
    }

    /// Forget the scheduled flush; pending values are kept for the next one
    pub fn cancel(&mut self) {
        self.flush_scheduled = false;
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub fn pending(&self) -> &VariableUpdates {
        &self.pending
    }

    pub fn variable(&self, id: &str) -> Option<&TrackedVariable> {
        self.variables.get(id)
    }

    pub fn definitions(&self) -> Vec<VariableDefinition> {
        self.variables
            .values()
            .map(|v| VariableDefinition {
                id: v.id.clone(),
                name: v.name.clone(),
            })
            .collect()
    }
}

struct Inner {
    state: DebounceState,
    /// Bumped on cancel so a stale timer cannot flush
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Debounce queue driving a [`VariableSink`] from tokio timers
///
/// Cloning shares the queue.
#[derive(Clone)]
pub struct DebouncedQueue {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn VariableSink>,
}

impl DebouncedQueue {
    pub fn new(interval: Duration, sink: Arc<dyn VariableSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: DebounceState::new(interval),
                generation: 0,
                timer: None,
            })),
            sink,
        }
    }

    /// Queue pre-populated with the standard variable definitions
    pub fn with_definitions(
        interval: Duration,
        sink: Arc<dyn VariableSink>,
        definitions: &[(&str, &str)],
    ) -> Self {
        let queue = Self::new(interval, sink);
        {
            let mut inner = queue.lock();
            for (id, name) in definitions {
                inner.state.define(id, name);
            }
        }
        queue
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the pending flush timer, if any
    ///
    /// Pending values survive and go out with the next scheduled flush.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state.cancel();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
            debug!("Cancelled pending variable flush");
        }
    }

    pub fn definitions(&self) -> Vec<VariableDefinition> {
        self.lock().state.definitions()
    }

    pub fn variable(&self, id: &str) -> Option<TrackedVariable> {
        self.lock().state.variable(id).cloned()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.lock().state.is_flush_scheduled()
    }

    fn flush(&self, generation: u64) {
        let batch = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.timer = None;
            inner.state.flush(Instant::now())
        };

        if batch.is_empty() {
            trace!("Flush found nothing pending");
            return;
        }
        debug!(variables = batch.len(), "Flushing variable updates");
        self.sink.set_variable_values(batch);
    }
}

impl UpdateQueue for DebouncedQueue {
    fn enqueue(&self, updates: VariableUpdates) {
        let mut inner = self.lock();
        let Some(delay) = inner.state.enqueue(updates, Instant::now()) else {
            return;
        };

        let generation = inner.generation;
        let queue = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.flush(generation);
        }));
    }
}
