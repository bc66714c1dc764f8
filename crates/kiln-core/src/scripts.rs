//! Script Queue
//!
//! Code fragments are discovered at any time, resolved (inline text or a
//! fetch), held until the runtime is ready, then evaluated once each in
//! discovery order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, Topic};
use crate::error::{BackendError, BootError, BootResult, FetchError};
use crate::runtime::RuntimeManager;
use crate::tasks::{Completion, Tasks};

// ─────────────────────────────────────────────────────────────────────────────
// Script Record
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of user code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: Uuid,
    /// Inline text, or the fetched content once resolved
    pub code: String,
    /// URL to fetch the code from when there is no inline text
    pub src: Option<String>,
    /// Where the fragment came from, for diagnostics
    pub source: Option<String>,
}

impl ScriptRecord {
    /// A fragment with inline code. Whitespace-only code counts as empty.
    pub fn inline(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            code: if code.trim().is_empty() { String::new() } else { code },
            src: None,
            source: None,
        }
    }

    /// A fragment whose code lives at `src`
    pub fn remote(src: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: String::new(),
            src: Some(src.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Human-readable name for logs
    pub fn label(&self) -> &str {
        self.source
            .as_deref()
            .or(self.src.as_deref())
            .unwrap_or("<inline>")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Queue
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    /// Runtime not ready; loaded scripts wait
    #[default]
    Queueing,
    /// Loaded scripts are evaluated as soon as every earlier one has been
    Open,
}

/// A discovered script's place in the evaluation order
struct Slot {
    id: Uuid,
    /// Filled once the code is available
    record: Option<ScriptRecord>,
}

#[derive(Default)]
struct QueueState {
    phase: Phase,
    /// Discovery order; only the loaded prefix may be evaluated
    slots: VecDeque<Slot>,
    /// A release loop is running further up the stack
    releasing: bool,
    /// Remote fetches may be spawned
    fetching: bool,
    /// Remote records discovered before fetching was enabled
    deferred: Vec<ScriptRecord>,
    evaluated: HashSet<Uuid>,
    failures: usize,
}

/// Defers evaluation of discovered scripts until the runtime is ready and
/// evaluates them in discovery order
pub struct ScriptQueue {
    state: Mutex<QueueState>,
    runtime: Arc<RuntimeManager>,
    bus: EventBus,
    tasks: Tasks,
}

impl ScriptQueue {
    pub(crate) fn new(runtime: Arc<RuntimeManager>, bus: EventBus, tasks: Tasks) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            runtime,
            bus,
            tasks,
        }
    }

    /// Subscribe to the script topics
    pub(crate) fn attach(self: &Arc<Self>) {
        let queue = Arc::downgrade(self);
        self.bus.subscribe(Topic::ScriptDiscovered, move |event| {
            match (queue.upgrade(), event) {
                (Some(queue), Event::ScriptDiscovered(record)) => queue.discover(record.clone()),
                _ => Ok(()),
            }
        });

        let queue = Arc::downgrade(self);
        self.bus.subscribe(Topic::ScriptLoaded, move |event| {
            match (queue.upgrade(), event) {
                (Some(queue), Event::ScriptLoaded(record)) => queue.on_script_loaded(record.clone()),
                _ => Ok(()),
            }
        });

        let queue = Arc::downgrade(self);
        self.bus.subscribe(Topic::EvalScript, move |event| {
            match (queue.upgrade(), event) {
                (Some(queue), Event::EvalScript(record)) => queue.on_eval_script(record),
                _ => Ok(()),
            }
        });
    }

    /// Subscribe the ready handler. Kept apart from [`ScriptQueue::attach`]
    /// so the coordinator controls where it sits in the ready fan-out.
    pub(crate) fn attach_ready(self: &Arc<Self>) {
        let queue = Arc::downgrade(self);
        self.bus.subscribe(Topic::RuntimeReady, move |_| match queue.upgrade() {
            Some(queue) => queue.on_runtime_ready(),
            None => Ok(()),
        });
    }

    /// Reserve the fragment's place in the evaluation order and resolve it
    pub fn discover(&self, record: ScriptRecord) -> BootResult<()> {
        if record.code.is_empty() && record.src.is_none() {
            warn!(script = record.label(), "Dropping script with neither code nor src");
            return Ok(());
        }

        let fetch_now = {
            let mut state = self.state.lock();
            let known = state.evaluated.contains(&record.id)
                || state.slots.iter().any(|slot| slot.id == record.id);
            if !known {
                state.slots.push_back(Slot {
                    id: record.id,
                    record: None,
                });
            }
            state.fetching
        };

        if !record.code.is_empty() {
            debug!(script = record.label(), "Inline script");
            self.bus.publish(Event::ScriptLoaded(record))?;
        } else if fetch_now {
            self.fetch(record)?;
        } else {
            debug!(script = record.label(), "Fetch deferred until configured");
            self.state.lock().deferred.push(record);
        }
        Ok(())
    }

    fn fetch(&self, record: ScriptRecord) -> BootResult<()> {
        let Some(src) = record.src.clone() else {
            return Ok(());
        };
        debug!(script = record.label(), %src, "Fetching script");
        self.tasks
            .fetch(src, move |result| Completion::ScriptFetched { record, result })
    }

    /// Allow remote fetches and start the ones discovered so far, in
    /// discovery order
    pub(crate) fn start_fetching(&self) -> BootResult<()> {
        let deferred = {
            let mut state = self.state.lock();
            state.fetching = true;
            std::mem::take(&mut state.deferred)
        };
        for record in deferred {
            self.fetch(record)?;
        }
        Ok(())
    }

    /// Apply the outcome of a script fetch
    pub(crate) fn fetched(
        &self,
        mut record: ScriptRecord,
        result: Result<String, FetchError>,
    ) -> BootResult<()> {
        match result {
            Ok(code) => {
                record.code = code;
                self.bus.publish(Event::ScriptLoaded(record))?;
                Ok(())
            }
            Err(source) => Err(BootError::ScriptFetch {
                src: record.src.unwrap_or_default(),
                source,
            }),
        }
    }

    /// Fill the record's slot, then evaluate whatever is now first in line
    pub fn on_script_loaded(&self, record: ScriptRecord) -> BootResult<()> {
        {
            let mut state = self.state.lock();
            let open = state
                .slots
                .iter()
                .position(|slot| slot.id == record.id && slot.record.is_none());
            match open {
                Some(index) => state.slots[index].record = Some(record),
                None if state.evaluated.contains(&record.id)
                    || state.slots.iter().any(|slot| slot.id == record.id) =>
                {
                    debug!(script = record.label(), "Duplicate script ignored");
                    return Ok(());
                }
                // Loaded without being discovered here; it goes last.
                None => state.slots.push_back(Slot {
                    id: record.id,
                    record: Some(record),
                }),
            }
            if state.phase == Phase::Queueing {
                debug!(queued = state.slots.len(), "Queued until runtime is ready");
                return Ok(());
            }
        }
        self.release()
    }

    /// Start evaluating queued scripts. Runs once.
    pub fn on_runtime_ready(&self) -> BootResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Queueing {
                debug!("Script queue already drained");
                return Ok(());
            }
            state.phase = Phase::Open;
            info!(pending = state.slots.len(), "Draining script queue");
        }
        self.release()
    }

    /// Evaluate the loaded scripts at the front of the queue, stopping at the
    /// first one still loading
    fn release(&self) -> BootResult<()> {
        {
            let mut state = self.state.lock();
            if state.releasing {
                return Ok(());
            }
            state.releasing = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let loaded = matches!(state.slots.front(), Some(slot) if slot.record.is_some());
                if !loaded {
                    state.releasing = false;
                    return Ok(());
                }
                state.slots.pop_front().and_then(|slot| slot.record)
            };
            let Some(record) = next else { continue };
            if let Err(e) = self.bus.publish(Event::EvalScript(record)) {
                self.state.lock().releasing = false;
                return Err(e);
            }
        }
    }

    /// Evaluate a script, at most once per record
    pub fn on_eval_script(&self, record: &ScriptRecord) -> BootResult<()> {
        if !self.state.lock().evaluated.insert(record.id) {
            debug!(script = record.label(), "Script already evaluated");
            return Ok(());
        }

        match self.runtime.eval(record) {
            Ok(()) => Ok(()),
            Err(BootError::Backend {
                source: BackendError::Eval(message),
                ..
            }) => {
                error!(script = record.label(), %message, "Script raised an error");
                self.state.lock().failures += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Number of scripts whose evaluation raised an error
    pub fn failures(&self) -> usize {
        self.state.lock().failures
    }
}
