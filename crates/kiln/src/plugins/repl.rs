//! Interactive REPL
//!
//! Marks the config with `repl = true` and switches the runtime into REPL
//! mode once it is ready. The host then forwards input lines through
//! `Coordinator::stdin`.

use kiln_core::{Config, Plugin, PluginContext, RuntimeManager};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplPlugin;

impl Plugin for ReplPlugin {
    fn name(&self) -> &str {
        "repl"
    }

    fn configure(&self, config: &mut Config) -> anyhow::Result<()> {
        config.set("repl", true)?;
        Ok(())
    }

    fn on_runtime_ready(&self, _ctx: &PluginContext, runtime: &RuntimeManager) -> anyhow::Result<()> {
        runtime.start_repl()?;
        info!(runtime = runtime.name().as_deref().unwrap_or_default(), "REPL started");
        Ok(())
    }
}
