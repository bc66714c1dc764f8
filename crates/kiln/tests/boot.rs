//! End-to-end boots with the bundled backends and built-in plugins

use std::io::Write;
use std::sync::Arc;

use kiln::plugins::{ReplPlugin, SourcesPlugin, SplashPlugin};
use kiln_core::{BootError, Coordinator, Event, Overrides, Topic};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

/// Write sink that can be inspected after the plugin owns it
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

/// Sink whose terminal has gone away
struct Hangup;

impl Write for Hangup {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Err(std::io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::ErrorKind::BrokenPipe.into())
    }
}

fn stdout_of(coordinator: &Coordinator) -> Arc<Mutex<String>> {
    let text = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&text);
    coordinator.bus().subscribe(Topic::Print, move |event| {
        if let Event::Print(chunk) = event {
            sink.lock().push_str(chunk);
        }
        Ok(())
    });
    text
}

fn options(value: Value) -> Overrides {
    match value {
        Value::Object(map) => Overrides::Map(map),
        _ => Overrides::Map(Map::new()),
    }
}

#[tokio::test]
async fn test_snippets_then_scripts_on_quickjs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.js"), "print('from file', counter);").unwrap();
    std::fs::write(dir.path().join("data.json"), "{\"n\": 3}").unwrap();

    let splash_out = SharedBuf::default();
    let splash = SplashPlugin::new(splash_out.clone());
    let handle = splash.handle();

    let mut coordinator = kiln::builder(dir.path())
        .plugin(splash)
        .plugin(
            SourcesPlugin::new()
                .snippet("var counter = 3;")
                .script("main.js"),
        )
        .build();
    let out = stdout_of(&coordinator);

    coordinator
        .run(options(json!({ "files": { "data.json": "data.json" } })))
        .await
        .unwrap();

    assert_eq!(*out.lock(), "from file 3\n");
    assert_eq!(coordinator.plugin_names(), vec!["splash", "sources"]);
    assert_eq!(coordinator.eval_failures(), 0);

    // Files are installed by the time boot has finished.
    assert!(coordinator.eval("print(JSON.parse(kiln.readFile('data.json')).n * 2)").unwrap());
    assert_eq!(*out.lock(), "from file 3\n6\n");

    assert!(!handle.is_visible());
    let splash_text = splash_out.text();
    assert!(splash_text.starts_with("Loading kiln..."));
    assert!(splash_text.ends_with("\x1b[2K\r"));
}

#[tokio::test]
async fn test_script_files_run_in_argument_order() {
    let dir = tempfile::tempdir().unwrap();
    // The larger first file gives the second read a head start.
    let padding = "// padding\n".repeat(20_000);
    std::fs::write(dir.path().join("a.js"), format!("{padding}print('a');")).unwrap();
    std::fs::write(dir.path().join("b.js"), "print('b');").unwrap();

    let mut coordinator = kiln::builder(dir.path())
        .plugin(SourcesPlugin::new().script("a.js").script("b.js"))
        .build();
    let out = stdout_of(&coordinator);

    coordinator
        .run(options(json!({ "splash": "" })))
        .await
        .unwrap();

    assert_eq!(*out.lock(), "a\nb\n");
}

#[tokio::test]
async fn test_broken_splash_sink_does_not_fail_boot() {
    let dir = tempfile::tempdir().unwrap();
    let splash = SplashPlugin::new(Hangup);
    let handle = splash.handle();
    let mut coordinator = kiln::builder(dir.path())
        .plugin(splash)
        .plugin(SourcesPlugin::new().snippet("print('still here')"))
        .build();
    let out = stdout_of(&coordinator);

    coordinator.run(Overrides::None).await.unwrap();

    assert_eq!(*out.lock(), "still here\n");
    assert!(!handle.is_visible());
}

#[tokio::test]
async fn test_lua_runtime_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = kiln::builder(dir.path())
        .plugin(SourcesPlugin::new().snippet("print(kiln.runtime, _VERSION)"))
        .build();
    let out = stdout_of(&coordinator);

    coordinator
        .run(options(json!({ "runtime": "LUA", "splash": "" })))
        .await
        .unwrap();

    assert_eq!(*out.lock(), "lua\tLua 5.4\n");
}

#[tokio::test]
async fn test_failed_boot_keeps_splash() {
    let dir = tempfile::tempdir().unwrap();
    let splash = SplashPlugin::new(SharedBuf::default());
    let handle = splash.handle();
    let mut coordinator = kiln::builder(dir.path()).plugin(splash).build();

    let err = coordinator
        .run(options(json!({ "runtime": "cobol" })))
        .await
        .unwrap_err();

    assert!(matches!(err, BootError::UnknownRuntime { .. }));
    assert!(handle.is_visible());
}

#[tokio::test]
async fn test_missing_script_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = kiln::builder(dir.path())
        .plugin(SourcesPlugin::new().script("nope.js"))
        .build();

    let err = coordinator.run(Overrides::None).await.unwrap_err();
    assert!(matches!(err, BootError::ScriptFetch { ref src, .. } if src == "nope.js"));
}

#[tokio::test]
async fn test_repl_plugin_enables_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = kiln::builder(dir.path()).plugin(ReplPlugin).build();
    let out = stdout_of(&coordinator);

    coordinator
        .run(options(json!({ "splash": "" })))
        .await
        .unwrap();
    assert_eq!(coordinator.config().get_bool("repl"), Some(true));

    coordinator.stdin("[1, 2].map(x => x * 10)").unwrap();
    assert_eq!(*out.lock(), "[10,20]\n");
}
