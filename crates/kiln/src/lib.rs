//! Kiln
//!
//! Runs scripts in an embedded QuickJS or Lua runtime. This crate ties the
//! lifecycle coordinator to the bundled backends, the built-in plugins and
//! the command line.

pub mod cli;
pub mod plugins;

use std::io::Write;
use std::path::PathBuf;

use kiln_core::{BackendTable, BootResult, Coordinator, CoordinatorBuilder, DefaultFetcher, Event};
use parking_lot::Mutex;
use tracing::warn;

/// Every backend bundled into the binary
pub fn builtin_backends() -> BackendTable {
    BackendTable::new()
        .with(kiln_js::descriptor())
        .with(kiln_lua::descriptor())
}

/// Fetcher serving the backend preludes from memory and relative paths from
/// `base_dir`
pub fn builtin_fetcher(base_dir: impl Into<PathBuf>) -> DefaultFetcher {
    DefaultFetcher::new()
        .with_base_dir(base_dir)
        .with_asset(kiln_js::PRELUDE_URL, kiln_js::PRELUDE)
        .with_asset(kiln_lua::PRELUDE_URL, kiln_lua::PRELUDE)
}

/// Coordinator builder preloaded with the bundled backends
pub fn builder(base_dir: impl Into<PathBuf>) -> CoordinatorBuilder {
    Coordinator::builder()
        .backends(builtin_backends())
        .fetcher(builtin_fetcher(base_dir))
}

/// `print` handler copying script output to `writer`
///
/// A failed write is logged and dropped; it never fails the boot.
pub fn print_to<W>(writer: W) -> impl Fn(&Event) -> BootResult<()> + Send + Sync + 'static
where
    W: Write + Send + 'static,
{
    let writer = Mutex::new(writer);
    move |event| {
        if let Event::Print(text) = event {
            let mut writer = writer.lock();
            if let Err(e) = writer
                .write_all(text.as_bytes())
                .and_then(|()| writer.flush())
            {
                warn!(error = %e, "Failed to write script output");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_print_to_writes_text() {
        let out = Captured::default();
        let handler = print_to(out.clone());

        handler(&Event::Print("hello\n".into())).unwrap();
        handler(&Event::RuntimeReady { name: "quickjs".into() }).unwrap();
        handler(&Event::Print("again\n".into())).unwrap();

        assert_eq!(&*out.0.lock(), b"hello\nagain\n");
    }

    #[test]
    fn test_print_to_closed_pipe_is_not_fatal() {
        let handler = print_to(ClosedPipe);
        assert!(handler(&Event::Print("lost\n".into())).is_ok());
    }

    #[test]
    fn test_builtin_backends() {
        let table = builtin_backends();
        assert_eq!(table.names(), vec!["lua", "quickjs"]);
        assert_eq!(table.resolve("default").unwrap().name(), "quickjs");
        assert_eq!(
            table.resolve("Lua").unwrap().url(),
            "builtin:lua/prelude.lua"
        );
    }
}
