//! Splash line
//!
//! Shows the `splash` text while the runtime boots and clears it once boot
//! has finished. An aborted boot leaves it in place.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kiln_core::{Plugin, PluginContext, Topic};
use parking_lot::Mutex;
use tracing::warn;

struct SplashState {
    visible: AtomicBool,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl SplashState {
    fn show(&self, text: &str) {
        if self.visible.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock();
        if let Err(e) = write!(sink, "{text}\r").and_then(|()| sink.flush()) {
            warn!(error = %e, "Failed to draw splash");
        }
    }

    fn hide(&self) {
        if !self.visible.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock();
        // Erase the line the splash was written on.
        if let Err(e) = write!(sink, "\x1b[2K\r").and_then(|()| sink.flush()) {
            warn!(error = %e, "Failed to clear splash");
        }
    }
}

/// Read-only view of the splash, for hosts and tests
#[derive(Clone)]
pub struct SplashHandle(Arc<SplashState>);

impl SplashHandle {
    pub fn is_visible(&self) -> bool {
        self.0.visible.load(Ordering::SeqCst)
    }
}

pub struct SplashPlugin {
    state: Arc<SplashState>,
}

impl SplashPlugin {
    /// Splash written to stderr
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(SplashState {
                visible: AtomicBool::new(false),
                sink: Mutex::new(Box::new(sink)),
            }),
        }
    }

    pub fn handle(&self) -> SplashHandle {
        SplashHandle(Arc::clone(&self.state))
    }
}

impl Plugin for SplashPlugin {
    fn name(&self) -> &str {
        "splash"
    }

    fn start(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let text = ctx.config().splash();
        if text.is_empty() {
            return Ok(());
        }
        self.state.show(text);

        let state = Arc::clone(&self.state);
        ctx.bus().subscribe(Topic::Finished, move |_| {
            state.hide();
            Ok(())
        });
        Ok(())
    }
}
