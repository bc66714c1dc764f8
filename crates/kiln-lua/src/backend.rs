//! Lua Backend
//!
//! A single Lua 5.4 state. `print` is captured into the shared [`Output`];
//! `require` resolves modules against the virtual filesystem.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_core::{Backend, BackendError, Config, Output, ReadySignal, ScriptRecord};
use mlua::{Function, Lua, MultiValue, Table, Value};
use parking_lot::Mutex;
use tracing::debug;

type Vfs = Arc<Mutex<BTreeMap<String, String>>>;

pub struct LuaBackend {
    output: Output,
    files: Vfs,
    lua: Option<Lua>,
    repl: bool,
}

impl LuaBackend {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            files: Arc::default(),
            lua: None,
            repl: false,
        }
    }

    fn lua(&self) -> Result<&Lua, BackendError> {
        self.lua.as_ref().ok_or(BackendError::NotStarted)
    }
}

impl Backend for LuaBackend {
    fn start(&mut self, config: &Config, code: &str, ready: ReadySignal) -> Result<(), BackendError> {
        let lua = Lua::new();
        if let Some(limit) = config.get_u64("memory_limit") {
            lua.set_memory_limit(usize::try_from(limit).unwrap_or(usize::MAX))
                .map_err(|e| BackendError::Start(e.to_string()))?;
        }

        install_globals(&lua, &self.output, &self.files)
            .map_err(|e| BackendError::Start(e.to_string()))?;
        lua.load(code)
            .set_name("=prelude")
            .exec()
            .map_err(|e| BackendError::Start(format!("prelude: {e}")))?;

        debug!(target: "kiln.lua", "Lua started");
        self.lua = Some(lua);
        ready.ready();
        Ok(())
    }

    fn eval(&mut self, script: &ScriptRecord) -> Result<(), BackendError> {
        self.lua()?
            .load(script.code.as_str())
            .set_name(format!("={}", script.label()))
            .exec()
            .map_err(|e| BackendError::Eval(e.to_string()))
    }

    fn add_file(&mut self, path: &str, content: &str) -> Result<(), BackendError> {
        self.files
            .lock()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn start_repl(&mut self) -> Result<(), BackendError> {
        self.lua()?;
        self.repl = true;
        Ok(())
    }

    /// Evaluate one REPL line. Expressions are tried first so their values
    /// can be echoed.
    fn stdin(&mut self, input: &str) -> Result<(), BackendError> {
        if !self.repl {
            return Err(BackendError::Other("REPL not started".into()));
        }
        let lua = self.lua()?;

        let result = match lua
            .load(format!("return {input}"))
            .set_name("=stdin")
            .eval::<MultiValue>()
        {
            Err(mlua::Error::SyntaxError { .. }) => {
                lua.load(input).set_name("=stdin").eval::<MultiValue>()
            }
            other => other,
        };

        match result.and_then(|values| render(lua, values)) {
            Ok(Some(line)) => self.output.writeln(&line),
            Ok(None) => {}
            Err(e) => self.output.writeln(&format!("error: {e}")),
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Globals
// ─────────────────────────────────────────────────────────────────────────────

fn install_globals(lua: &Lua, output: &Output, files: &Vfs) -> mlua::Result<()> {
    let globals = lua.globals();

    let out = output.clone();
    let print = lua.create_function(move |lua, args: MultiValue| {
        let line = render(lua, args)?.unwrap_or_default();
        out.writeln(&line);
        Ok(())
    })?;
    globals.set("print", print)?;

    let kiln = lua.create_table()?;
    kiln.set("runtime", crate::NAME)?;

    let vfs = Arc::clone(files);
    kiln.set(
        "read_file",
        lua.create_function(move |_, path: String| match vfs.lock().get(&path) {
            Some(content) => Ok(content.clone()),
            None => Err(mlua::Error::RuntimeError(format!("no such file: {path}"))),
        })?,
    )?;

    let vfs = Arc::clone(files);
    kiln.set(
        "files",
        lua.create_function(move |_, ()| Ok(vfs.lock().keys().cloned().collect::<Vec<_>>()))?,
    )?;
    globals.set("kiln", kiln)?;

    install_require(lua, files)
}

/// `require(name)` looks for `name/with/dots.lua`, then `.../init.lua`, in
/// the virtual filesystem and caches the result in `package.loaded`.
fn install_require(lua: &Lua, files: &Vfs) -> mlua::Result<()> {
    let vfs = Arc::clone(files);
    let require = lua.create_function(move |lua, name: String| {
        let package: Table = lua.globals().get("package")?;
        let loaded: Table = package.get("loaded")?;
        let cached: Value = loaded.get(name.as_str())?;
        if !cached.is_nil() {
            return Ok(cached);
        }

        let module_rel = name.replace('.', "/");
        let candidates = [format!("{module_rel}.lua"), format!("{module_rel}/init.lua")];
        let found = {
            let vfs = vfs.lock();
            candidates
                .iter()
                .find_map(|path| vfs.get(path).map(|source| (path.clone(), source.clone())))
        };
        let Some((path, source)) = found else {
            return Err(mlua::Error::RuntimeError(format!(
                "module '{name}' not found (searched: {})",
                candidates.join(", ")
            )));
        };

        let module: Value = lua.load(source).set_name(format!("={path}")).eval()?;
        // A module that returns nothing is cached as `true`, as stock Lua does.
        let module = if module.is_nil() {
            Value::Boolean(true)
        } else {
            module
        };
        loaded.set(name.as_str(), module.clone())?;
        Ok(module)
    })?;
    lua.globals().set("require", require)
}

/// Join values the way `print` does, `None` for no values
fn render(lua: &Lua, values: MultiValue) -> mlua::Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    let tostring: Function = lua.globals().get("tostring")?;
    let parts = values
        .into_iter()
        .map(|value| tostring.call::<String>(value))
        .collect::<mlua::Result<Vec<_>>>()?;
    Ok(Some(parts.join("\t")))
}
