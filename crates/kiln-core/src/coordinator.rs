//! Lifecycle Coordinator
//!
//! Wires the components to one event bus and drives the boot:
//!
//! ```text
//! load(overrides) ─► configured ─► register staged plugins, freeze config
//!                                 ├► runtime.load ─► runtime-loaded ─► runtime.start ─► runtime-ready
//!                                 ├► files.load_all ─► file-fetched* ─► files-loaded
//!                                 ├► scripts.start_fetching
//!                                 └► plugins.start_all
//! runtime-ready ─► files drain ─► plugins notified ─► scripts drain ─► check_finished
//! files-loaded  ─► check_finished
//! ```
//!
//! All handlers run on the task that calls [`Coordinator::run`] or
//! [`Coordinator::settle`]. Spawned tasks only fetch and report back.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::{Event, EventBus, Topic};
use crate::config::{Config, ConfigStore, Overrides};
use crate::error::{BootError, BootResult};
use crate::fetch::{DefaultFetcher, Fetcher};
use crate::files::FileLoader;
use crate::join::CompletionGate;
use crate::plugin::{Plugin, PluginRegistry};
use crate::runtime::{BackendTable, RuntimeDescriptor, RuntimeManager, RuntimeState};
use crate::scripts::{ScriptQueue, ScriptRecord};
use crate::tasks::{Completion, Tasks};

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles a [`Coordinator`]
#[derive(Default)]
pub struct CoordinatorBuilder {
    backends: BackendTable,
    fetcher: Option<Arc<dyn Fetcher>>,
    bus: Option<EventBus>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl CoordinatorBuilder {
    /// Add a backend to the table
    pub fn backend(self, descriptor: RuntimeDescriptor) -> Self {
        self.backends.register(descriptor);
        self
    }

    /// Replace the backend table
    pub fn backends(mut self, table: BackendTable) -> Self {
        self.backends = table;
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetcher) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Use an existing bus. Handlers already subscribed to it see every
    /// event before the coordinator's own handlers do.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Stage a plugin; it is registered before any host plugin once the
    /// config has loaded
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn build(self) -> Coordinator {
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(DefaultFetcher::new()),
        };
        let (tasks, rx) = Tasks::new(fetcher);
        let bus = self.bus.unwrap_or_default();

        let config = Arc::new(ConfigStore::new(bus.clone()));
        let runtime = Arc::new(RuntimeManager::new(self.backends, bus.clone(), tasks.clone()));
        let plugins = Arc::new(PluginRegistry::new(
            Arc::clone(&config),
            Arc::clone(&runtime),
            bus.clone(),
        ));
        let scripts = Arc::new(ScriptQueue::new(Arc::clone(&runtime), bus.clone(), tasks.clone()));
        let files = Arc::new(FileLoader::new(Arc::clone(&runtime), bus.clone(), tasks.clone()));
        let gate = Arc::new(CompletionGate::new(
            Arc::clone(&runtime),
            Arc::clone(&files),
            bus.clone(),
        ));

        let inner = Arc::new(Inner {
            bus,
            config,
            runtime,
            plugins,
            scripts,
            files,
            gate,
            tasks,
            staged: Mutex::new(self.plugins),
        });
        inner.attach();

        Coordinator { inner, rx }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    bus: EventBus,
    config: Arc<ConfigStore>,
    runtime: Arc<RuntimeManager>,
    plugins: Arc<PluginRegistry>,
    scripts: Arc<ScriptQueue>,
    files: Arc<FileLoader>,
    gate: Arc<CompletionGate>,
    tasks: Tasks,
    /// Plugins registered before the config loaded
    staged: Mutex<Vec<Arc<dyn Plugin>>>,
}

impl Inner {
    fn attach(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        self.bus.subscribe(Topic::Configured, move |_| match inner.upgrade() {
            Some(inner) => inner.on_configured(),
            None => Ok(()),
        });

        let inner = Arc::downgrade(self);
        self.bus.subscribe(Topic::RuntimeLoaded, move |_| match inner.upgrade() {
            Some(inner) => inner.runtime.start(&inner.config.snapshot()),
            None => Ok(()),
        });

        self.scripts.attach();
        self.files.attach();

        // Ready fan-out order: files are installed before plugins see the
        // runtime, and both happen before user scripts run.
        self.files.attach_ready();
        self.plugins.attach_ready();
        self.scripts.attach_ready();
        self.gate.attach();
    }

    fn on_configured(&self) -> BootResult<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        for plugin in staged {
            self.plugins.register(plugin)?;
        }

        self.config.freeze();
        let config = self.config.snapshot();

        self.runtime.load(config.runtime())?;
        self.files.load_all(config.files()?)?;
        self.scripts.start_fetching()?;
        self.plugins.start_all()
    }

    fn complete(&self, completion: Completion) -> BootResult<()> {
        match completion {
            Completion::RuntimeFetched { name, result } => self.runtime.loaded(name, result),
            Completion::RuntimeStarted { result } => self.runtime.ready(result),
            Completion::ScriptFetched { record, result } => self.scripts.fetched(record, result),
            Completion::FileFetched { path, result } => self.files.fetched(path, result),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Boots one runtime and everything that depends on it
pub struct Coordinator {
    inner: Arc<Inner>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Load the config and drive the boot until it settles
    ///
    /// Any error aborts the boot; nothing is retried.
    pub async fn run(&mut self, overrides: Overrides) -> BootResult<()> {
        info!("Booting");
        self.inner.config.load(overrides)?;
        self.settle().await
    }

    /// Apply completions until no work is outstanding
    ///
    /// Fails with [`BootError::Stalled`] if work runs out before `finished`.
    /// Call again after discovering scripts with a `src` post-boot.
    pub async fn settle(&mut self) -> BootResult<()> {
        loop {
            if self.inner.tasks.in_flight() == 0 {
                if self.inner.gate.is_finished() {
                    return Ok(());
                }
                return Err(BootError::Stalled);
            }
            let Some(completion) = self.rx.recv().await else {
                return Err(BootError::Stalled);
            };
            self.inner.tasks.settle_one();
            self.inner.complete(completion)?;
        }
    }

    /// Register a host plugin
    ///
    /// Before the config has loaded the plugin is staged; afterwards it is
    /// configured and caught up with the hooks it missed right away.
    pub fn register_plugin(&self, plugin: impl Plugin + 'static) -> BootResult<()> {
        let plugin: Arc<dyn Plugin> = Arc::new(plugin);
        {
            let mut staged = self.inner.staged.lock();
            if !self.inner.config.is_loaded() {
                debug!(plugin = plugin.name(), "Staged plugin");
                staged.push(plugin);
                return Ok(());
            }
        }
        self.inner.plugins.register(plugin)
    }

    /// Announce a code fragment
    ///
    /// Safe to call before [`Coordinator::run`], outside any async runtime:
    /// fetches for remote fragments start once the config has loaded.
    pub fn discover(&self, record: ScriptRecord) -> BootResult<()> {
        self.inner.bus.publish(Event::ScriptDiscovered(record))?;
        Ok(())
    }

    /// Evaluate code directly. Returns `Ok(false)` without doing anything
    /// while the runtime is not ready.
    pub fn eval(&self, code: &str) -> BootResult<bool> {
        if !self.inner.runtime.is_ready() {
            debug!("Ignoring eval before runtime is ready");
            return Ok(false);
        }
        let record = ScriptRecord::inline(code).with_source("eval");
        self.inner.runtime.eval(&record)?;
        Ok(true)
    }

    pub fn start_repl(&self) -> BootResult<()> {
        self.inner.runtime.start_repl()
    }

    pub fn stdin(&self, input: &str) -> BootResult<()> {
        self.inner.runtime.stdin(input)
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config.snapshot()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn plugin_names(&self) -> Vec<String> {
        let mut names = self.inner.plugins.names();
        names.extend(self.inner.staged.lock().iter().map(|p| p.name().to_string()));
        names
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.inner.runtime.table().names()
    }

    /// Name of the selected backend
    pub fn active_runtime(&self) -> Option<String> {
        self.inner.runtime.name()
    }

    pub fn runtime_state(&self) -> RuntimeState {
        self.inner.runtime.state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.runtime.is_ready()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.gate.is_finished()
    }

    /// Scripts whose evaluation raised an error
    pub fn eval_failures(&self) -> usize {
        self.inner.scripts.failures()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("runtime", &self.inner.runtime)
            .field("plugins", &self.plugin_names())
            .field("finished", &self.is_finished())
            .finish()
    }
}
