//! Script sources given on the command line

use kiln_core::{Plugin, PluginContext, ScriptRecord};
use tracing::debug;

/// Discovers `--eval` snippets, then script paths or URLs, in that order
#[derive(Debug, Clone, Default)]
pub struct SourcesPlugin {
    snippets: Vec<String>,
    scripts: Vec<String>,
}

impl SourcesPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snippet(mut self, code: impl Into<String>) -> Self {
        self.snippets.push(code.into());
        self
    }

    /// A file path (relative to the working directory) or URL
    pub fn script(mut self, src: impl Into<String>) -> Self {
        self.scripts.push(src.into());
        self
    }
}

impl Plugin for SourcesPlugin {
    fn name(&self) -> &str {
        "sources"
    }

    fn start(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        for (i, code) in self.snippets.iter().enumerate() {
            debug!(index = i, "Discovered --eval snippet");
            ctx.discover(ScriptRecord::inline(code.as_str()).with_source(format!("--eval #{}", i + 1)))?;
        }
        for src in &self.scripts {
            debug!(%src, "Discovered script");
            ctx.discover(ScriptRecord::remote(src.as_str()))?;
        }
        Ok(())
    }
}
