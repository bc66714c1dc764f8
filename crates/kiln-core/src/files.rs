//! File Loader
//!
//! Fetches the auxiliary files named by the `files` option and installs them
//! into the runtime's virtual filesystem once it is ready.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, Topic};
use crate::error::{BootError, BootResult, FetchError};
use crate::runtime::RuntimeManager;
use crate::tasks::{Completion, Tasks};

/// A fetched file waiting for installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

#[derive(Default)]
struct LoaderState {
    requested: Option<usize>,
    settled: usize,
    pending: VecDeque<FileRecord>,
    /// Runtime is ready and the pending files were handed over
    open: bool,
    loaded: bool,
}

pub struct FileLoader {
    state: Mutex<LoaderState>,
    runtime: Arc<RuntimeManager>,
    bus: EventBus,
    tasks: Tasks,
}

impl FileLoader {
    pub(crate) fn new(runtime: Arc<RuntimeManager>, bus: EventBus, tasks: Tasks) -> Self {
        Self {
            state: Mutex::new(LoaderState::default()),
            runtime,
            bus,
            tasks,
        }
    }

    pub(crate) fn attach(self: &Arc<Self>) {
        let loader = Arc::downgrade(self);
        self.bus.subscribe(Topic::FileFetched, move |event| {
            match (loader.upgrade(), event) {
                (Some(loader), Event::FileFetched(record)) => {
                    loader.on_file_fetched(&record.path, &record.content)
                }
                _ => Ok(()),
            }
        });
    }

    pub(crate) fn attach_ready(self: &Arc<Self>) {
        let loader = Arc::downgrade(self);
        self.bus.subscribe(Topic::RuntimeReady, move |_| match loader.upgrade() {
            Some(loader) => loader.on_runtime_ready(),
            None => Ok(()),
        });
    }

    /// Start one fetch per entry of `files` (virtual path → URL)
    pub fn load_all(&self, files: BTreeMap<String, String>) -> BootResult<()> {
        {
            let mut state = self.state.lock();
            if state.requested.is_some() {
                warn!("Files already requested");
                return Ok(());
            }
            state.requested = Some(files.len());
        }

        if files.is_empty() {
            return self.complete();
        }

        info!(count = files.len(), "Fetching files");
        for (path, url) in files {
            debug!(%path, %url, "Fetching file");
            self.tasks
                .fetch(url, move |result| Completion::FileFetched { path, result })?;
        }
        Ok(())
    }

    /// Apply the outcome of a file fetch
    pub(crate) fn fetched(&self, path: String, result: Result<String, FetchError>) -> BootResult<()> {
        let content = result.map_err(|source| BootError::FileFetch {
            path: path.clone(),
            source,
        })?;
        let record = FileRecord { path, content };

        let (deliver, all_settled) = {
            let mut state = self.state.lock();
            state.settled += 1;
            let all_settled = Some(state.settled) == state.requested;
            if state.open {
                (Some(record), all_settled)
            } else {
                debug!(path = %record.path, "File held until runtime is ready");
                state.pending.push_back(record);
                (None, all_settled)
            }
        };

        if let Some(record) = deliver {
            self.bus.publish(Event::FileFetched(record))?;
        }
        if all_settled {
            self.complete()?;
        }
        Ok(())
    }

    fn complete(&self) -> BootResult<()> {
        let count = {
            let mut state = self.state.lock();
            if state.loaded {
                return Ok(());
            }
            state.loaded = true;
            state.settled
        };
        info!(count, "Files loaded");
        self.bus.publish(Event::FilesLoaded { count })?;
        Ok(())
    }

    /// Install one file into the runtime
    pub fn on_file_fetched(&self, path: &str, content: &str) -> BootResult<()> {
        debug!(%path, bytes = content.len(), "Installing file");
        self.runtime.add_file(path, content)
    }

    /// Hand files fetched before readiness to the runtime. Runs once.
    pub fn on_runtime_ready(&self) -> BootResult<()> {
        let pending = {
            let mut state = self.state.lock();
            if state.open {
                return Ok(());
            }
            state.open = true;
            std::mem::take(&mut state.pending)
        };
        for record in pending {
            self.bus.publish(Event::FileFetched(record))?;
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }
}
