//! Lua 5.4 backend for kiln
//!
//! Scripts get a captured `print`, `kiln.read_file(path)`, `kiln.files()`,
//! and a `require` that loads modules from files installed through the
//! `files` option (`require("a.b")` → `a/b.lua` or `a/b/init.lua`).
//! `memory_limit` caps the Lua heap (bytes).

mod backend;

pub use backend::LuaBackend;

use kiln_core::RuntimeDescriptor;

pub const NAME: &str = "lua";

pub const PRELUDE_URL: &str = "builtin:lua/prelude.lua";

pub const PRELUDE: &str = include_str!("prelude.lua");

pub fn descriptor() -> RuntimeDescriptor {
    RuntimeDescriptor::new(NAME, PRELUDE_URL, |output| Box::new(LuaBackend::new(output)))
}
