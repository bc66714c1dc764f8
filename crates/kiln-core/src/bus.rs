//! Event Bus
//!
//! In-order, synchronous publish/subscribe channel. Every lifecycle component
//! talks to the others only through here.
//!
//! `publish` snapshots the handlers subscribed to the event's topic and calls
//! them in subscription order before returning. A handler may publish again;
//! the nested publish runs to completion first (depth-first). Subscriptions
//! made during a publish only see later publishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};
use wildmatch::WildMatch;

use crate::config::Config;
use crate::error::BootResult;
use crate::files::FileRecord;
use crate::scripts::ScriptRecord;

// ─────────────────────────────────────────────────────────────────────────────
// Topics
// ─────────────────────────────────────────────────────────────────────────────

/// Named topics of the public event vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Configured,
    PluginRegistered,
    PluginStarted,
    RuntimeLoaded,
    RuntimeReady,
    ScriptDiscovered,
    ScriptLoaded,
    EvalScript,
    FileFetched,
    FilesLoaded,
    Finished,
    Print,
}

impl Topic {
    pub const ALL: [Topic; 12] = [
        Topic::Configured,
        Topic::PluginRegistered,
        Topic::PluginStarted,
        Topic::RuntimeLoaded,
        Topic::RuntimeReady,
        Topic::ScriptDiscovered,
        Topic::ScriptLoaded,
        Topic::EvalScript,
        Topic::FileFetched,
        Topic::FilesLoaded,
        Topic::Finished,
        Topic::Print,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Configured => "configured",
            Topic::PluginRegistered => "plugin-registered",
            Topic::PluginStarted => "plugin-started",
            Topic::RuntimeLoaded => "runtime-loaded",
            Topic::RuntimeReady => "runtime-ready",
            Topic::ScriptDiscovered => "script-discovered",
            Topic::ScriptLoaded => "script-loaded",
            Topic::EvalScript => "eval-script",
            Topic::FileFetched => "file-fetched",
            Topic::FilesLoaded => "files-loaded",
            Topic::Finished => "finished",
            Topic::Print => "print",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// An event and its payload
#[derive(Debug, Clone)]
pub enum Event {
    /// Config has been merged with overrides
    Configured(Arc<Config>),
    PluginRegistered { name: String },
    PluginStarted { name: String },
    /// Runtime code finished downloading
    RuntimeLoaded { name: String },
    /// Runtime booted and can evaluate code
    RuntimeReady { name: String },
    /// A collaborator found a code fragment
    ScriptDiscovered(ScriptRecord),
    /// A code fragment's source is available
    ScriptLoaded(ScriptRecord),
    EvalScript(ScriptRecord),
    FileFetched(FileRecord),
    FilesLoaded { count: usize },
    Finished,
    /// Output captured from the interpreter
    Print(String),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Configured(_) => Topic::Configured,
            Event::PluginRegistered { .. } => Topic::PluginRegistered,
            Event::PluginStarted { .. } => Topic::PluginStarted,
            Event::RuntimeLoaded { .. } => Topic::RuntimeLoaded,
            Event::RuntimeReady { .. } => Topic::RuntimeReady,
            Event::ScriptDiscovered(_) => Topic::ScriptDiscovered,
            Event::ScriptLoaded(_) => Topic::ScriptLoaded,
            Event::EvalScript(_) => Topic::EvalScript,
            Event::FileFetched(_) => Topic::FileFetched,
            Event::FilesLoaded { .. } => Topic::FilesLoaded,
            Event::Finished => Topic::Finished,
            Event::Print(_) => Topic::Print,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Callback invoked for each matching event
///
/// Returning an error stops the fan-out and fails the publish.
pub type Handler = Arc<dyn Fn(&Event) -> BootResult<()> + Send + Sync>;

enum Pattern {
    Exact(Topic),
    Glob(WildMatch),
}

impl Pattern {
    fn matches(&self, topic: Topic) -> bool {
        match self {
            Pattern::Exact(t) => *t == topic,
            Pattern::Glob(glob) => glob.matches(topic.as_str()),
        }
    }
}

struct Subscription {
    pattern: Pattern,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscriptions: Mutex<Vec<Subscription>>,
    published: AtomicU64,
}

/// Publish/subscribe statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub subscribers: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a shared event bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one topic
    pub fn subscribe<F>(&self, topic: Topic, handler: F)
    where
        F: Fn(&Event) -> BootResult<()> + Send + Sync + 'static,
    {
        self.add(Pattern::Exact(topic), Arc::new(handler));
    }

    /// Subscribe a handler to every topic whose name matches a glob
    /// (`"*"`, `"script-*"`, ...)
    pub fn subscribe_pattern<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&Event) -> BootResult<()> + Send + Sync + 'static,
    {
        self.add(Pattern::Glob(WildMatch::new(pattern)), Arc::new(handler));
    }

    fn add(&self, pattern: Pattern, handler: Handler) {
        self.inner
            .subscriptions
            .lock()
            .push(Subscription { pattern, handler });
    }

    /// Deliver an event to every current subscriber of its topic
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: Event) -> BootResult<usize> {
        let topic = event.topic();
        debug!(%topic, "publish");

        // Handlers run without the lock held so they can publish and subscribe.
        let handlers: Vec<Handler> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.pattern.matches(topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        for handler in &handlers {
            handler(&event)?;
        }

        trace!(%topic, notified = handlers.len(), "published");
        Ok(handlers.len())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            subscribers: self.inner.subscriptions.lock().len(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootError;

    fn recorder(bus: &EventBus, pattern: &str) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        bus.subscribe_pattern(pattern, move |event| {
            sink.lock().push(event.topic().to_string());
            Ok(())
        });
        log
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::EvalScript.as_str(), "eval-script");
        assert_eq!(Topic::FilesLoaded.to_string(), "files-loaded");
        assert_eq!(Event::Finished.topic(), Topic::Finished);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            bus.subscribe(Topic::Finished, move |_| {
                log.lock().push(i);
                Ok(())
            });
        }

        assert_eq!(bus.publish(Event::Finished).unwrap(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_topic_is_delivered() {
        let bus = EventBus::new();
        let log = recorder(&bus, "script-*");

        bus.publish(Event::Finished).unwrap();
        bus.publish(Event::ScriptDiscovered(ScriptRecord::inline("1")))
            .unwrap();
        bus.publish(Event::ScriptLoaded(ScriptRecord::inline("1")))
            .unwrap();

        assert_eq!(*log.lock(), vec!["script-discovered", "script-loaded"]);
    }

    #[test]
    fn test_reentrant_publish_is_depth_first() {
        let bus = EventBus::new();
        let log = recorder(&bus, "*");

        let inner = bus.clone();
        bus.subscribe(Topic::RuntimeReady, move |_| {
            inner.publish(Event::Finished)?;
            Ok(())
        });
        let order = Arc::clone(&log);
        bus.subscribe(Topic::RuntimeReady, move |_| {
            order.lock().push("second-handler".into());
            Ok(())
        });

        bus.publish(Event::RuntimeReady { name: "x".into() }).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["runtime-ready", "finished", "second-handler"]
        );
    }

    #[test]
    fn test_subscribe_during_publish_is_not_retroactive() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));

        let b = bus.clone();
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::Finished, move |_| {
            let h = Arc::clone(&h);
            b.subscribe(Topic::Finished, move |_| {
                *h.lock() += 1;
                Ok(())
            });
            Ok(())
        });

        bus.publish(Event::Finished).unwrap();
        assert_eq!(*hits.lock(), 0);
        bus.publish(Event::Finished).unwrap();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_handler_error_stops_fan_out() {
        let bus = EventBus::new();
        bus.subscribe(Topic::Finished, |_| Err(BootError::Stalled));
        let log = recorder(&bus, "finished");

        let err = bus.publish(Event::Finished).unwrap_err();
        assert!(matches!(err, BootError::Stalled));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_stats() {
        let bus = EventBus::new();
        let _log = recorder(&bus, "*");
        bus.publish(Event::Finished).unwrap();
        bus.publish(Event::Print("hi".into())).unwrap();

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.subscribers, 1);
    }
}
