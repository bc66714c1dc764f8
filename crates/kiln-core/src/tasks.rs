//! Suspension points
//!
//! Async work runs in spawned tasks that only do I/O. Each task reports a
//! [`Completion`] back to the coordinator's driver, which applies completions
//! one at a time. Coordinator state is therefore never touched concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{BootError, BootResult, FetchError};
use crate::fetch::Fetcher;
use crate::runtime::ReadySignal;
use crate::scripts::ScriptRecord;

/// Result of a finished suspension point
pub(crate) enum Completion {
    RuntimeFetched {
        name: String,
        result: Result<String, FetchError>,
    },
    RuntimeStarted {
        result: Result<(), String>,
    },
    ScriptFetched {
        record: ScriptRecord,
        result: Result<String, FetchError>,
    },
    FileFetched {
        path: String,
        result: Result<String, FetchError>,
    },
}

/// Spawns suspension points and counts the ones still outstanding
#[derive(Clone)]
pub(crate) struct Tasks {
    tx: mpsc::UnboundedSender<Completion>,
    in_flight: Arc<AtomicUsize>,
    fetcher: Arc<dyn Fetcher>,
}

impl Tasks {
    pub(crate) fn new(fetcher: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tasks = Self {
            tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            fetcher,
        };
        (tasks, rx)
    }

    /// Fetch `url` in the background and report through `complete`
    ///
    /// Fails without spawning anything when called outside a tokio runtime.
    pub(crate) fn fetch<F>(&self, url: String, complete: F) -> BootResult<()>
    where
        F: FnOnce(Result<String, FetchError>) -> Completion + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| BootError::NoAsyncRuntime(url.clone()))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();
        handle.spawn(async move {
            let result = fetcher.fetch(&url).await;
            // The receiver only closes when the coordinator is gone.
            let _ = tx.send(complete(result));
        });
        Ok(())
    }

    /// Signal handed to a backend for reporting the end of its boot
    pub(crate) fn ready_signal(&self) -> ReadySignal {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ReadySignal::new(self.tx.clone())
    }

    /// Mark one completion as applied
    pub(crate) fn settle_one(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    fn file_completion(result: Result<String, FetchError>) -> Completion {
        Completion::FileFetched {
            path: "a.txt".into(),
            result,
        }
    }

    #[test]
    fn test_fetch_outside_async_runtime_is_an_error() {
        let (tasks, _rx) = Tasks::new(Arc::new(MemoryFetcher::new()));
        let err = tasks
            .fetch("http://x/a.txt".into(), file_completion)
            .unwrap_err();
        assert!(matches!(err, BootError::NoAsyncRuntime(ref url) if url == "http://x/a.txt"));
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fetch_reports_completion() {
        let fetcher = MemoryFetcher::new().with("http://x/a.txt", "hello");
        let (tasks, mut rx) = Tasks::new(Arc::new(fetcher));
        tasks
            .fetch("http://x/a.txt".into(), file_completion)
            .unwrap();
        assert_eq!(tasks.in_flight(), 1);

        let Some(Completion::FileFetched { path, result }) = rx.recv().await else {
            panic!("expected a file completion");
        };
        assert_eq!(path, "a.txt");
        assert_eq!(result.unwrap(), "hello");
        tasks.settle_one();
        assert_eq!(tasks.in_flight(), 0);
    }
}
