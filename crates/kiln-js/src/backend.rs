//! QuickJS Backend
//!
//! One QuickJS runtime and context per process. Output from `print` and
//! `console.log` goes to the shared [`Output`] buffer.

use std::sync::Arc;

use kiln_core::{Backend, BackendError, Config, Output, ReadySignal, ScriptRecord};
use rquickjs::{Context, Runtime, Value};
use tracing::{debug, warn};

use crate::globals::{Vfs, describe, display, register_globals};

/// Heap limit applied when the config sets no `memory_limit`
pub const DEFAULT_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;

struct Engine {
    runtime: Runtime,
    context: Context,
}

impl Engine {
    /// Run queued promise jobs until none are left
    fn drain_jobs(&self) {
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                warn!(target: "kiln.js", "Promise job raised an error");
            }
        }
    }
}

pub struct QuickJsBackend {
    output: Output,
    files: Vfs,
    engine: Option<Engine>,
    repl: bool,
}

impl QuickJsBackend {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            files: Arc::default(),
            engine: None,
            repl: false,
        }
    }

    fn engine(&self) -> Result<&Engine, BackendError> {
        self.engine.as_ref().ok_or(BackendError::NotStarted)
    }
}

impl Backend for QuickJsBackend {
    fn start(&mut self, config: &Config, code: &str, ready: ReadySignal) -> Result<(), BackendError> {
        let runtime = Runtime::new().map_err(|e| BackendError::Start(e.to_string()))?;
        let limit = config.get_u64("memory_limit").unwrap_or(DEFAULT_MEMORY_LIMIT);
        runtime.set_memory_limit(usize::try_from(limit).unwrap_or(usize::MAX));

        let context = Context::full(&runtime).map_err(|e| BackendError::Start(e.to_string()))?;
        context.with(|ctx| {
            register_globals(&ctx, &self.output, &self.files)
                .map_err(|e| BackendError::Start(e.to_string()))?;
            ctx.eval::<(), _>(code)
                .map_err(|e| BackendError::Start(format!("prelude: {}", describe(&ctx, e))))
        })?;

        debug!(target: "kiln.js", memory_limit = limit, "QuickJS started");
        let engine = Engine { runtime, context };
        engine.drain_jobs();
        self.engine = Some(engine);
        ready.ready();
        Ok(())
    }

    fn eval(&mut self, script: &ScriptRecord) -> Result<(), BackendError> {
        let engine = self.engine()?;
        let result = engine.context.with(|ctx| {
            ctx.eval::<Value, _>(script.code.as_str())
                .map(|_| ())
                .map_err(|e| BackendError::Eval(describe(&ctx, e)))
        });
        engine.drain_jobs();
        result
    }

    fn add_file(&mut self, path: &str, content: &str) -> Result<(), BackendError> {
        self.files
            .lock()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn start_repl(&mut self) -> Result<(), BackendError> {
        self.engine()?;
        self.repl = true;
        Ok(())
    }

    /// Evaluate one REPL line and echo its value
    fn stdin(&mut self, input: &str) -> Result<(), BackendError> {
        if !self.repl {
            return Err(BackendError::Other("REPL not started".into()));
        }
        let engine = self.engine()?;
        let output = &self.output;
        engine.context.with(|ctx| match ctx.eval::<Value, _>(input) {
            Ok(value) => {
                if let Some(text) = display(&ctx, value) {
                    output.writeln(&text);
                }
            }
            Err(e) => output.writeln(&format!("Uncaught {}", describe(&ctx, e))),
        });
        engine.drain_jobs();
        Ok(())
    }
}
