//! Interpreter backends
//!
//! A backend is one embedded language engine. All backends implement the same
//! [`Backend`] trait; the one to run is picked by name from a [`BackendTable`].

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{Config, DEFAULT_RUNTIME};
use crate::error::BackendError;
use crate::scripts::ScriptRecord;
use crate::tasks::Completion;

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// An embedded interpreter
///
/// `add_file`, `start_repl` and `stdin` are optional; the defaults report
/// [`BackendError::Unsupported`].
pub trait Backend: Send {
    /// Boot the interpreter with the downloaded runtime `code`.
    ///
    /// Call [`ReadySignal::ready`] once the interpreter can evaluate code. The
    /// signal may be moved into a task and fired later.
    fn start(&mut self, config: &Config, code: &str, ready: ReadySignal) -> Result<(), BackendError>;

    fn eval(&mut self, script: &ScriptRecord) -> Result<(), BackendError>;

    /// Install `content` at `path` in the virtual filesystem, overwriting.
    fn add_file(&mut self, _path: &str, _content: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("add_file"))
    }

    fn start_repl(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("start_repl"))
    }

    fn stdin(&mut self, _input: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("stdin"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ready Signal
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot callback a backend fires when its boot has finished
///
/// Dropping the signal without firing it aborts the boot.
pub struct ReadySignal {
    tx: Option<mpsc::UnboundedSender<Completion>>,
}

impl ReadySignal {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn ready(mut self) {
        self.send(Ok(()));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.send(Err(reason.into()));
    }

    fn send(&mut self, result: Result<(), String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Completion::RuntimeStarted { result });
        }
    }
}

impl Drop for ReadySignal {
    fn drop(&mut self) {
        self.send(Err("backend dropped its ready signal".into()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Buffer for interpreter stdout
///
/// The runtime manager drains it after every backend call and publishes the
/// text as a `print` event.
#[derive(Clone, Default)]
pub struct Output {
    buf: Arc<Mutex<String>>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, text: &str) {
        self.buf.lock().push_str(text);
    }

    pub fn writeln(&self, text: &str) {
        let mut buf = self.buf.lock();
        buf.push_str(text);
        buf.push('\n');
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buf.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Descriptor
// ─────────────────────────────────────────────────────────────────────────────

type Factory = Arc<dyn Fn(Output) -> Box<dyn Backend> + Send + Sync>;

/// Identifies one backend: its name, where its code is loaded from, and how
/// to instantiate it
#[derive(Clone)]
pub struct RuntimeDescriptor {
    name: String,
    url: String,
    factory: Factory,
}

impl RuntimeDescriptor {
    pub fn new<F>(name: impl Into<String>, url: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Output) -> Box<dyn Backend> + Send + Sync + 'static,
    {
        Self {
            name: name.into().to_lowercase(),
            url: url.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn instantiate(&self, output: Output) -> Box<dyn Backend> {
        (self.factory)(output)
    }
}

impl std::fmt::Debug for RuntimeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeDescriptor")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Table
// ─────────────────────────────────────────────────────────────────────────────

/// Known backends, keyed by lowercase name
#[derive(Clone, Default)]
pub struct BackendTable {
    entries: Arc<DashMap<String, RuntimeDescriptor>>,
}

impl BackendTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, descriptor: RuntimeDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Add or replace a backend
    pub fn register(&self, descriptor: RuntimeDescriptor) {
        self.entries.insert(descriptor.name.clone(), descriptor);
    }

    /// Look up a backend by case-insensitive name. `default` names the
    /// default runtime.
    pub fn resolve(&self, name: &str) -> Option<RuntimeDescriptor> {
        let mut key = name.trim().to_lowercase();
        if key == "default" {
            key = DEFAULT_RUNTIME.to_string();
        }
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// Sorted backend names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
