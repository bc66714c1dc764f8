//! Fetchers
//!
//! The only genuinely asynchronous work the coordinator does is fetching:
//! runtime code, scripts by URL, and auxiliary files. Everything goes through
//! the [`Fetcher`] trait so hosts and tests can swap the transport.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::FetchError;

/// Scheme for content bundled into the binary
pub const BUILTIN_SCHEME: &str = "builtin:";

/// Source of remote text content
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Default Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches `http(s)://` URLs over the network, `file://` URLs and bare paths
/// from disk, and `builtin:` URLs from a table of bundled assets.
pub struct DefaultFetcher {
    client: reqwest::Client,
    base_dir: PathBuf,
    assets: HashMap<String, String>,
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_dir: PathBuf::from("."),
            assets: HashMap::new(),
        }
    }

    /// Resolve relative paths against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Serve `content` for `url` without touching the network or disk
    pub fn with_asset(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.assets.insert(url.into(), content.into());
        self
    }

    async fn fetch_http(&self, url: &str) -> Result<String, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(http_err)
    }

    async fn fetch_file(&self, url: &str) -> Result<String, FetchError> {
        let raw = url.strip_prefix("file://").unwrap_or(url);
        let path = self.base_dir.join(raw);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(url.to_string()))
            }
            Err(source) => Err(FetchError::Io {
                url: url.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "fetch");
        if let Some(asset) = self.assets.get(url) {
            return Ok(asset.clone());
        }
        if url.starts_with(BUILTIN_SCHEME) {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url).await
        } else {
            self.fetch_file(url).await
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Fetcher
// ─────────────────────────────────────────────────────────────────────────────

struct Entry {
    response: Result<String, u16>,
    gate: Option<Arc<Notify>>,
}

/// In-memory fetcher with scripted failures and per-URL gates
///
/// A held URL does not resolve until its gate is notified, which lets callers
/// force any completion order between concurrent fetches.
#[derive(Default)]
pub struct MemoryFetcher {
    entries: Mutex<HashMap<String, Entry>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
        self.entries.lock().insert(
            url.into(),
            Entry {
                response: Ok(body.into()),
                gate: None,
            },
        );
    }

    /// Answer `url` with an HTTP error status
    pub fn fail(&self, url: impl Into<String>, status: u16) {
        self.entries.lock().insert(
            url.into(),
            Entry {
                response: Err(status),
                gate: None,
            },
        );
    }

    /// Delay `url` until the returned gate is notified
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        let mut entries = self.entries.lock();
        let entry = entries.entry(url.to_string()).or_insert(Entry {
            response: Err(404),
            gate: None,
        });
        entry.gate = Some(Arc::clone(&gate));
        gate
    }

    /// URLs requested so far, in request order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().push(url.to_string());

        let (response, gate) = match self.entries.lock().get(url) {
            Some(entry) => (entry.response.clone(), entry.gate.clone()),
            None => return Err(FetchError::NotFound(url.to_string())),
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        response.map_err(|status| FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for Arc<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_assets() {
        let fetcher = DefaultFetcher::new().with_asset("builtin:js/prelude.js", "1 + 1");
        assert_eq!(fetcher.fetch("builtin:js/prelude.js").await.unwrap(), "1 + 1");
        assert!(matches!(
            fetcher.fetch("builtin:missing").await,
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_paths() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("main.js"), "print(1)")
            .await
            .unwrap();
        let fetcher = DefaultFetcher::new().with_base_dir(dir.path());

        assert_eq!(fetcher.fetch("main.js").await.unwrap(), "print(1)");

        let absolute = format!("file://{}", dir.path().join("main.js").display());
        assert_eq!(fetcher.fetch(&absolute).await.unwrap(), "print(1)");

        assert!(matches!(
            fetcher.fetch("nope.js").await,
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new().with("http://x/a.py", "a = 1");
        fetcher.fail("http://x/b.py", 500);

        assert_eq!(fetcher.fetch("http://x/a.py").await.unwrap(), "a = 1");
        assert!(matches!(
            fetcher.fetch("http://x/b.py").await,
            Err(FetchError::Status { status: 500, .. })
        ));
        assert!(matches!(
            fetcher.fetch("http://x/c.py").await,
            Err(FetchError::NotFound(_))
        ));
        assert_eq!(
            fetcher.requests(),
            vec!["http://x/a.py", "http://x/b.py", "http://x/c.py"]
        );
    }

    #[tokio::test]
    async fn test_memory_fetcher_gate() {
        let fetcher = Arc::new(MemoryFetcher::new().with("http://x/slow", "done"));
        let gate = fetcher.hold("http://x/slow");

        let pending = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch("http://x/slow").await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        gate.notify_one();
        assert_eq!(pending.await.unwrap().unwrap(), "done");
    }
}
