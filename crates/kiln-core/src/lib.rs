//! Kiln Core
//!
//! Lifecycle coordinator for an embedded scripting runtime. Plugin setup,
//! runtime download and boot, script discovery and auxiliary file loading
//! are serialized through one [`EventBus`] into a deterministic startup that
//! ends in a single `finished` event.
//!
//! ```rust,ignore
//! let mut coordinator = Coordinator::builder()
//!     .backend(RuntimeDescriptor::new("quickjs", "builtin:quickjs/prelude.js", factory))
//!     .build();
//! coordinator.discover(ScriptRecord::inline("print('hi')"))?;
//! coordinator.run(Overrides::Json(r#"{"runtime": "quickjs"}"#.into())).await?;
//! ```

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod files;
pub mod join;
pub mod plugin;
pub mod runtime;
pub mod scripts;
mod tasks;

pub use bus::{BusStats, Event, EventBus, Handler, Topic};
pub use config::{Config, ConfigStore, DEFAULT_RUNTIME, DEFAULT_SPLASH, Overrides};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{BackendError, BootError, BootResult, ConfigError, FetchError, Hook};
pub use fetch::{BUILTIN_SCHEME, DefaultFetcher, Fetcher, MemoryFetcher};
pub use files::{FileLoader, FileRecord};
pub use join::CompletionGate;
pub use plugin::{Plugin, PluginContext, PluginRegistry};
pub use runtime::{Backend, BackendTable, Output, ReadySignal, RuntimeDescriptor, RuntimeManager, RuntimeState};
pub use scripts::{ScriptQueue, ScriptRecord};
