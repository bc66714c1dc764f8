//! Runtime Manager
//!
//! Owns the single backend of the process and walks it through
//! `Unloaded → Loading → Starting → Ready`.

mod backend;

pub use backend::{Backend, BackendTable, Output, ReadySignal, RuntimeDescriptor};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::config::Config;
use crate::error::{BackendError, BootError, BootResult, FetchError};
use crate::scripts::ScriptRecord;
use crate::tasks::{Completion, Tasks};

/// Lifecycle state of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeState {
    #[default]
    Unloaded,
    /// Runtime code is downloading
    Loading,
    /// Backend is booting
    Starting,
    Ready,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeState::Unloaded => write!(f, "unloaded"),
            RuntimeState::Loading => write!(f, "loading"),
            RuntimeState::Starting => write!(f, "starting"),
            RuntimeState::Ready => write!(f, "ready"),
        }
    }
}

#[derive(Default)]
struct Slot {
    state: RuntimeState,
    descriptor: Option<RuntimeDescriptor>,
    code: Option<String>,
    backend: Option<Box<dyn Backend>>,
}

impl Slot {
    fn name(&self) -> String {
        self.descriptor
            .as_ref()
            .map(|d| d.name().to_string())
            .unwrap_or_default()
    }
}

/// Selects, downloads, boots and drives the backend
pub struct RuntimeManager {
    table: BackendTable,
    slot: Mutex<Slot>,
    output: Output,
    bus: EventBus,
    tasks: Tasks,
}

impl RuntimeManager {
    pub(crate) fn new(table: BackendTable, bus: EventBus, tasks: Tasks) -> Self {
        Self {
            table,
            slot: Mutex::new(Slot::default()),
            output: Output::new(),
            bus,
            tasks,
        }
    }

    /// Select a backend by name and start downloading its code
    pub fn load(&self, name: &str) -> BootResult<()> {
        let Some(descriptor) = self.table.resolve(name) else {
            return Err(BootError::UnknownRuntime {
                name: name.to_string(),
                known: self.table.names(),
            });
        };

        let mut slot = self.slot.lock();
        if slot.state != RuntimeState::Unloaded {
            warn!(requested = name, current = %slot.name(), "Runtime already selected");
            return Ok(());
        }

        info!(runtime = descriptor.name(), url = descriptor.url(), "Loading runtime");
        let runtime = descriptor.name().to_string();
        self.tasks
            .fetch(descriptor.url().to_string(), move |result| {
                Completion::RuntimeFetched {
                    name: runtime,
                    result,
                }
            })?;
        slot.state = RuntimeState::Loading;
        slot.descriptor = Some(descriptor);
        Ok(())
    }

    /// Apply the outcome of the runtime download
    pub(crate) fn loaded(&self, name: String, result: Result<String, FetchError>) -> BootResult<()> {
        let code = result.map_err(|source| BootError::RuntimeDownload {
            runtime: name.clone(),
            source,
        })?;

        {
            let mut slot = self.slot.lock();
            slot.code = Some(code);
            slot.state = RuntimeState::Starting;
        }

        debug!(runtime = %name, "Runtime downloaded");
        self.bus.publish(Event::RuntimeLoaded { name })?;
        Ok(())
    }

    /// Instantiate the backend and boot it with the downloaded code
    pub fn start(&self, config: &Config) -> BootResult<()> {
        let result = {
            let mut slot = self.slot.lock();
            let slot = &mut *slot;
            if slot.backend.is_some() {
                debug!(runtime = %slot.name(), "Runtime already started");
                return Ok(());
            }
            let (Some(descriptor), Some(code)) = (slot.descriptor.as_ref(), slot.code.take())
            else {
                return Err(BootError::NotReady("start"));
            };

            info!(runtime = descriptor.name(), "Starting runtime");
            let mut backend = descriptor.instantiate(self.output.clone());
            let result = backend.start(config, &code, self.tasks.ready_signal());
            slot.backend = Some(backend);
            result.map_err(|e| BootError::RuntimeStart {
                runtime: descriptor.name().to_string(),
                reason: e.to_string(),
            })
        };

        self.flush_output()?;
        result
    }

    /// Apply the backend's ready signal
    pub(crate) fn ready(&self, result: Result<(), String>) -> BootResult<()> {
        let name = {
            let mut slot = self.slot.lock();
            if slot.state == RuntimeState::Ready {
                debug!(runtime = %slot.name(), "Duplicate ready signal ignored");
                return Ok(());
            }
            if let Err(reason) = result {
                return Err(BootError::RuntimeStart {
                    runtime: slot.name(),
                    reason,
                });
            }
            slot.state = RuntimeState::Ready;
            slot.name()
        };

        info!(runtime = %name, "Runtime ready");
        self.bus.publish(Event::RuntimeReady { name })?;
        Ok(())
    }

    pub fn eval(&self, script: &ScriptRecord) -> BootResult<()> {
        self.with_backend("eval", |backend| backend.eval(script))
    }

    /// Install a file into the backend's virtual filesystem
    pub fn add_file(&self, path: &str, content: &str) -> BootResult<()> {
        self.with_backend("add_file", |backend| backend.add_file(path, content))
    }

    pub fn start_repl(&self) -> BootResult<()> {
        self.with_backend("start_repl", |backend| backend.start_repl())
    }

    /// Forward one line of interactive input
    pub fn stdin(&self, input: &str) -> BootResult<()> {
        self.with_backend("stdin", |backend| backend.stdin(input))
    }

    fn with_backend<F>(&self, operation: &'static str, f: F) -> BootResult<()>
    where
        F: FnOnce(&mut dyn Backend) -> Result<(), BackendError>,
    {
        let (name, result) = {
            let mut slot = self.slot.lock();
            let slot = &mut *slot;
            let name = slot.name();
            match (slot.state, slot.backend.as_mut()) {
                (RuntimeState::Ready, Some(backend)) => (name, f(backend.as_mut())),
                _ => return Err(BootError::NotReady(operation)),
            }
        };

        self.flush_output()?;
        result.map_err(|e| BootError::backend(&name, e))
    }

    /// Publish whatever the backend printed, outside the slot lock
    fn flush_output(&self) -> BootResult<()> {
        let text = self.output.take();
        if !text.is_empty() {
            self.bus.publish(Event::Print(text))?;
        }
        Ok(())
    }

    pub fn state(&self) -> RuntimeState {
        self.slot.lock().state
    }

    /// Name of the selected backend, if any
    pub fn name(&self) -> Option<String> {
        self.slot
            .lock()
            .descriptor
            .as_ref()
            .map(|d| d.name().to_string())
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    pub fn table(&self) -> &BackendTable {
        &self.table
    }
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("state", &self.state())
            .field("runtime", &self.name())
            .finish()
    }
}
