//! QuickJS backend for kiln
//!
//! Globals available to scripts:
//!
//! - `print(...)`, `console.log(...)`: write to the interpreter output
//! - `console.info/warn/error/debug(...)`: write to the host log
//! - `kiln.readFile(path)`, `kiln.files()`, `kiln.load(path)`: the virtual
//!   filesystem populated from the `files` option
//!
//! The `memory_limit` option caps the QuickJS heap (bytes).

mod backend;
mod globals;

pub use backend::{DEFAULT_MEMORY_LIMIT, QuickJsBackend};

use kiln_core::RuntimeDescriptor;

/// Backend name in the runtime table
pub const NAME: &str = "quickjs";

/// Where the prelude is loaded from
pub const PRELUDE_URL: &str = "builtin:quickjs/prelude.js";

/// Code evaluated while the runtime boots
pub const PRELUDE: &str = include_str!("prelude.js");

pub fn descriptor() -> RuntimeDescriptor {
    RuntimeDescriptor::new(NAME, PRELUDE_URL, |output| Box::new(QuickJsBackend::new(output)))
}
