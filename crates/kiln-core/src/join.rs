//! Completion Join
//!
//! Emits `finished` the first time the runtime is ready and every file has
//! loaded, whichever comes last.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::bus::{Event, EventBus, Topic};
use crate::error::BootResult;
use crate::files::FileLoader;
use crate::runtime::RuntimeManager;

pub struct CompletionGate {
    runtime: Arc<RuntimeManager>,
    files: Arc<FileLoader>,
    finished: AtomicBool,
    bus: EventBus,
}

impl CompletionGate {
    pub(crate) fn new(runtime: Arc<RuntimeManager>, files: Arc<FileLoader>, bus: EventBus) -> Self {
        Self {
            runtime,
            files,
            finished: AtomicBool::new(false),
            bus,
        }
    }

    /// Re-check after each event that can flip a readiness flag
    pub(crate) fn attach(self: &Arc<Self>) {
        for topic in [Topic::RuntimeReady, Topic::FilesLoaded] {
            let gate = Arc::downgrade(self);
            self.bus.subscribe(topic, move |_| match gate.upgrade() {
                Some(gate) => gate.check_finished(),
                None => Ok(()),
            });
        }
    }

    pub fn check_finished(&self) -> BootResult<()> {
        if !self.runtime.is_ready() || !self.files.is_loaded() {
            return Ok(());
        }
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Boot finished");
        self.bus.publish(Event::Finished)?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
