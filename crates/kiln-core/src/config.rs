//! Config Store
//!
//! A mapping of option name to JSON value. Built from defaults, merged with
//! overrides exactly once, adjusted by plugin `configure` hooks, then frozen.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::info;

use crate::bus::{Event, EventBus};
use crate::error::{BootResult, ConfigError};

/// Backend selected when the config names none
pub const DEFAULT_RUNTIME: &str = "quickjs";

/// Text shown while the runtime boots
pub const DEFAULT_SPLASH: &str = "Loading kiln...";

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Option mapping with a one-way freeze
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    values: Map<String, Value>,
    frozen: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert("runtime".into(), Value::String(DEFAULT_RUNTIME.into()));
        values.insert("splash".into(), Value::String(DEFAULT_SPLASH.into()));
        values.insert("files".into(), Value::Object(Map::new()));
        Self {
            values,
            frozen: false,
        }
    }
}

impl Config {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Set an option. Fails once the config is frozen.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ConfigError> {
        let key = key.into();
        if self.frozen {
            return Err(ConfigError::Immutable { key });
        }
        self.values.insert(key, value.into());
        Ok(())
    }

    /// Name of the selected runtime. `interpreter` is an alias for `runtime`.
    pub fn runtime(&self) -> &str {
        self.get_str("runtime")
            .or_else(|| self.get_str("interpreter"))
            .unwrap_or(DEFAULT_RUNTIME)
    }

    pub fn splash(&self) -> &str {
        self.get_str("splash").unwrap_or(DEFAULT_SPLASH)
    }

    /// Virtual path to source URL mapping from the `files` option
    pub fn files(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let Some(value) = self.values.get("files") else {
            return Ok(BTreeMap::new());
        };
        let Value::Object(entries) = value else {
            return Err(ConfigError::InvalidValue {
                key: "files".into(),
                reason: "expected a mapping of path to URL".into(),
            });
        };
        entries
            .iter()
            .map(|(path, url)| match url.as_str() {
                Some(url) => Ok((path.clone(), url.to_string())),
                None => Err(ConfigError::InvalidValue {
                    key: format!("files.{path}"),
                    reason: "expected a URL string".into(),
                }),
            })
            .collect()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    fn merge(&mut self, overrides: Map<String, Value>) {
        for (key, value) in overrides {
            self.values.insert(key, value);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Overrides
// ─────────────────────────────────────────────────────────────────────────────

/// Override data supplied by the host
#[derive(Debug, Clone, Default)]
pub enum Overrides {
    #[default]
    None,
    Json(String),
    Toml(String),
    Map(Map<String, Value>),
}

impl Overrides {
    /// Read overrides from a file, picking the format from its extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Overrides::Toml(text)),
            Some("json") | None => Ok(Overrides::Json(text)),
            Some(other) => Err(ConfigError::Parse(format!(
                "unsupported config format '.{other}' (expected .json or .toml)"
            ))),
        }
    }

    /// Parse into a key/value mapping
    pub fn into_map(self) -> Result<Map<String, Value>, ConfigError> {
        let value = match self {
            Overrides::None => return Ok(Map::new()),
            Overrides::Map(map) => return Ok(map),
            Overrides::Json(text) if text.trim().is_empty() => return Ok(Map::new()),
            Overrides::Json(text) => {
                serde_json::from_str::<Value>(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Overrides::Toml(text) => {
                let table: toml::Table =
                    toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
                serde_json::to_value(table).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(ConfigError::Parse(format!(
                "expected a mapping of options, found {other}"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoreState {
    config: Arc<Config>,
    loaded: bool,
}

/// Shared owner of the process config
pub struct ConfigStore {
    state: RwLock<StoreState>,
    bus: EventBus,
}

impl ConfigStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            bus,
        }
    }

    /// Merge overrides onto the defaults and emit `configured`
    ///
    /// Nothing is applied if the overrides fail to parse.
    pub fn load(&self, overrides: Overrides) -> BootResult<()> {
        let overrides = overrides.into_map()?;
        let snapshot = {
            let mut state = self.state.write();
            if state.loaded {
                return Err(ConfigError::AlreadyLoaded.into());
            }
            if state.config.frozen {
                return Err(ConfigError::Immutable {
                    key: overrides.keys().next().cloned().unwrap_or_default(),
                }
                .into());
            }
            Arc::make_mut(&mut state.config).merge(overrides);
            state.loaded = true;
            Arc::clone(&state.config)
        };

        info!(runtime = snapshot.runtime(), "Loaded configuration");
        self.bus.publish(Event::Configured(snapshot))?;
        Ok(())
    }

    /// Current config
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.state.read().config)
    }

    /// Replace the config with an edited copy. Fails once frozen.
    pub fn commit(&self, config: Config) -> Result<(), ConfigError> {
        let mut state = self.state.write();
        if state.config.frozen {
            let key = config
                .values
                .iter()
                .find(|(k, v)| state.config.values.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .unwrap_or_default();
            return Err(ConfigError::Immutable { key });
        }
        state.config = Arc::new(Config {
            frozen: false,
            ..config
        });
        Ok(())
    }

    /// Make the config immutable for the rest of the process lifetime
    pub fn freeze(&self) {
        let mut state = self.state.write();
        if !state.config.frozen {
            Arc::make_mut(&mut state.config).frozen = true;
            info!("Frozen config");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().config.frozen
    }

    /// Whether overrides have been merged
    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }
}
