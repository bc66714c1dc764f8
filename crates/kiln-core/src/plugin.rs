//! Plugin Registry
//!
//! Plugins hook into three lifecycle points: `configure` (may edit the config
//! before it freezes), `start` (config is final), and `on_runtime_ready`.
//! A plugin registered late still sees every hook it missed, in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bus::{Event, EventBus, Topic};
use crate::config::{Config, ConfigStore};
use crate::error::{BootError, BootResult, Hook};
use crate::runtime::RuntimeManager;
use crate::scripts::ScriptRecord;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle extension
///
/// Every hook is optional. Returning an error aborts the boot.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Adjust the config before it is frozen
    fn configure(&self, _config: &mut Config) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_runtime_ready(&self, _ctx: &PluginContext, _runtime: &RuntimeManager) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What a hook sees of the coordinator
#[derive(Debug, Clone)]
pub struct PluginContext {
    config: Arc<Config>,
    bus: EventBus,
}

impl PluginContext {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Announce a code fragment to the script queue
    pub fn discover(&self, record: ScriptRecord) -> BootResult<()> {
        self.bus.publish(Event::ScriptDiscovered(record))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct Entry {
    plugin: Arc<dyn Plugin>,
    started: AtomicBool,
    notified: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Arc<Entry>>,
    started: bool,
    ready: bool,
}

/// Ordered list of plugins and the hooks they have run
pub struct PluginRegistry {
    state: Mutex<RegistryState>,
    config: Arc<ConfigStore>,
    runtime: Arc<RuntimeManager>,
    bus: EventBus,
}

impl PluginRegistry {
    pub(crate) fn new(config: Arc<ConfigStore>, runtime: Arc<RuntimeManager>, bus: EventBus) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            config,
            runtime,
            bus,
        }
    }

    pub(crate) fn attach_ready(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        self.bus.subscribe(Topic::RuntimeReady, move |_| match registry.upgrade() {
            Some(registry) => registry.notify_runtime_ready(),
            None => Ok(()),
        });
    }

    /// Configure and append a plugin, then catch it up with any hooks the
    /// others have already run
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> BootResult<()> {
        let name = plugin.name().to_string();

        let mut draft = (*self.config.snapshot()).clone();
        plugin
            .configure(&mut draft)
            .map_err(|e| BootError::plugin_hook(&name, Hook::Configure, e))?;
        if !draft.is_frozen() {
            self.config.commit(draft)?;
        }

        let entry = Arc::new(Entry {
            plugin,
            started: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        });
        let (started, ready) = {
            let mut state = self.state.lock();
            state.entries.push(Arc::clone(&entry));
            (state.started, state.ready)
        };

        info!(plugin = %name, "Registered plugin");
        self.bus.publish(Event::PluginRegistered { name })?;

        if started {
            self.start_entry(&entry)?;
        }
        if ready {
            self.notify_entry(&entry)?;
        }
        Ok(())
    }

    /// Run `start` on every plugin in registration order
    pub fn start_all(&self) -> BootResult<()> {
        let entries = {
            let mut state = self.state.lock();
            state.started = true;
            state.entries.clone()
        };
        info!(count = entries.len(), "Starting plugins");
        for entry in &entries {
            self.start_entry(entry)?;
        }
        Ok(())
    }

    /// Run `on_runtime_ready` on every plugin in registration order
    pub fn notify_runtime_ready(&self) -> BootResult<()> {
        let entries = {
            let mut state = self.state.lock();
            if state.ready {
                debug!("Plugins already notified");
                return Ok(());
            }
            state.ready = true;
            state.entries.clone()
        };
        for entry in &entries {
            self.notify_entry(entry)?;
        }
        Ok(())
    }

    fn start_entry(&self, entry: &Entry) -> BootResult<()> {
        if entry.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let name = entry.plugin.name().to_string();
        debug!(plugin = %name, "start");
        entry
            .plugin
            .start(&self.context())
            .map_err(|e| BootError::plugin_hook(&name, Hook::Start, e))?;
        self.bus.publish(Event::PluginStarted { name })?;
        Ok(())
    }

    fn notify_entry(&self, entry: &Entry) -> BootResult<()> {
        if entry.notified.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let name = entry.plugin.name();
        debug!(plugin = %name, "on_runtime_ready");
        entry
            .plugin
            .on_runtime_ready(&self.context(), &self.runtime)
            .map_err(|e| BootError::plugin_hook(name, Hook::RuntimeReady, e))
    }

    fn context(&self) -> PluginContext {
        PluginContext {
            config: self.config.snapshot(),
            bus: self.bus.clone(),
        }
    }

    /// Plugin names in registration order
    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }
}
