//! Error types for the boot sequence.
//!
//! Every error here is fatal while booting: the coordinator performs no retries
//! and no partial recovery.

/// Errors raised by the config store.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Config is frozen, cannot set '{key}'")]
    Immutable { key: String },

    #[error("Config already loaded")]
    AlreadyLoaded,

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors raised while fetching remote content.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Nothing found at {0}")]
    NotFound(String),
}

/// Errors raised by an interpreter backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Backend not started")]
    NotStarted,

    #[error("Failed to start backend: {0}")]
    Start(String),

    #[error("Evaluation failed: {0}")]
    Eval(String),

    #[error("Backend error: {0}")]
    Other(String),
}

/// The plugin hook that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Configure,
    Start,
    RuntimeReady,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::Configure => write!(f, "configure"),
            Hook::Start => write!(f, "start"),
            Hook::RuntimeReady => write!(f, "on_runtime_ready"),
        }
    }
}

/// Umbrella error for the lifecycle coordinator.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown runtime '{name}' (known runtimes: {})", .known.join(", "))]
    UnknownRuntime { name: String, known: Vec<String> },

    #[error("Runtime '{runtime}' does not support '{operation}'")]
    UnknownBackendOperation {
        runtime: String,
        operation: &'static str,
    },

    #[error("Cannot load script from {src}: {source}")]
    ScriptFetch {
        src: String,
        #[source]
        source: FetchError,
    },

    #[error("Cannot load file '{path}': {source}")]
    FileFetch {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error("Plugin '{plugin}' failed in {hook}: {source}")]
    PluginHook {
        plugin: String,
        hook: Hook,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to download runtime '{runtime}': {source}")]
    RuntimeDownload {
        runtime: String,
        #[source]
        source: FetchError,
    },

    #[error("Runtime '{runtime}' failed to start: {reason}")]
    RuntimeStart { runtime: String, reason: String },

    #[error("Runtime is not ready for '{0}'")]
    NotReady(&'static str),

    #[error("Runtime '{runtime}' failed: {source}")]
    Backend {
        runtime: String,
        #[source]
        source: BackendError,
    },

    #[error("Boot stalled before the runtime and files were ready")]
    Stalled,

    #[error("Cannot fetch {0} outside a tokio runtime")]
    NoAsyncRuntime(String),
}

impl BootError {
    /// Wrap an error raised by a plugin hook.
    ///
    /// A frozen-config violation keeps its own identity instead of being
    /// reported as a generic hook failure.
    pub fn plugin_hook(plugin: &str, hook: Hook, source: anyhow::Error) -> Self {
        // A hook that bubbled up a boot error (e.g. from a nested publish)
        // reports that error as is.
        let source = match source.downcast::<BootError>() {
            Ok(err) => return err,
            Err(source) => source,
        };
        match source.downcast::<ConfigError>() {
            Ok(err @ ConfigError::Immutable { .. }) => BootError::Config(err),
            Ok(other) => BootError::PluginHook {
                plugin: plugin.to_string(),
                hook,
                source: other.into(),
            },
            Err(source) => BootError::PluginHook {
                plugin: plugin.to_string(),
                hook,
                source,
            },
        }
    }

    /// Map a backend failure, turning unsupported operations into
    /// [`BootError::UnknownBackendOperation`].
    pub fn backend(runtime: &str, source: BackendError) -> Self {
        match source {
            BackendError::Unsupported(operation) => BootError::UnknownBackendOperation {
                runtime: runtime.to_string(),
                operation,
            },
            source => BootError::Backend {
                runtime: runtime.to_string(),
                source,
            },
        }
    }
}

pub type BootResult<T> = Result<T, BootError>;
