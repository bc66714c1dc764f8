//! QuickJS backend booted through the coordinator

use std::sync::Arc;

use kiln_core::{
    BackendError, BootError, Coordinator, Event, EventBus, MemoryFetcher, Overrides,
    ScriptRecord, Topic,
};
use parking_lot::Mutex;
use serde_json::json;

fn printed(bus: &EventBus) -> Arc<Mutex<String>> {
    let text = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&text);
    bus.subscribe(Topic::Print, move |event| {
        if let Event::Print(chunk) = event {
            sink.lock().push_str(chunk);
        }
        Ok(())
    });
    text
}

fn coordinator(fetcher: MemoryFetcher) -> Coordinator {
    Coordinator::builder()
        .backend(kiln_js::descriptor())
        .fetcher(fetcher.with(kiln_js::PRELUDE_URL, kiln_js::PRELUDE))
        .build()
}

fn config(value: serde_json::Value) -> Overrides {
    match value {
        serde_json::Value::Object(map) => Overrides::Map(map),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_scripts_print_in_order() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    let out = printed(coordinator.bus());

    coordinator
        .discover(ScriptRecord::inline("var total = 40;"))
        .unwrap();
    coordinator
        .discover(ScriptRecord::inline("total += 2; print('total', total);"))
        .unwrap();
    coordinator.run(Overrides::None).await.unwrap();

    assert_eq!(coordinator.active_runtime().as_deref(), Some("quickjs"));
    assert_eq!(*out.lock(), "total 42\n");
}

#[tokio::test]
async fn test_files_are_readable_from_scripts() {
    let fetcher = MemoryFetcher::new().with("http://x/greeting.txt", "hello from a file");
    let mut coordinator = coordinator(fetcher);
    let out = printed(coordinator.bus());

    coordinator
        .discover(ScriptRecord::inline(
            "kiln.println(kiln.readFile('data/greeting.txt'), kiln.exists('data/greeting.txt'))",
        ))
        .unwrap();
    coordinator
        .run(config(json!({ "files": { "data/greeting.txt": "http://x/greeting.txt" } })))
        .await
        .unwrap();

    assert_eq!(*out.lock(), "hello from a file true\n");
}

#[tokio::test]
async fn test_thrown_error_is_counted() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    coordinator
        .discover(ScriptRecord::inline("throw new Error('nope')"))
        .unwrap();
    coordinator.run(Overrides::None).await.unwrap();

    assert_eq!(coordinator.eval_failures(), 1);
}

#[tokio::test]
async fn test_memory_limit_is_enforced() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    coordinator
        .run(config(json!({ "memory_limit": 4 * 1024 * 1024 })))
        .await
        .unwrap();

    let err = coordinator
        .eval("let chunks = []; for (;;) chunks.push(new Array(100000).fill(1));")
        .unwrap_err();
    assert!(matches!(
        err,
        BootError::Backend { source: BackendError::Eval(_), .. }
    ));
}

#[tokio::test]
async fn test_repl_echoes_values() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    let out = printed(coordinator.bus());
    coordinator.run(Overrides::None).await.unwrap();

    assert!(matches!(
        coordinator.stdin("1"),
        Err(BootError::Backend { source: BackendError::Other(_), .. })
    ));

    coordinator.start_repl().unwrap();
    coordinator.stdin("const x = 6 * 7").unwrap();
    coordinator.stdin("x").unwrap();
    coordinator.stdin("({ ok: true })").unwrap();
    coordinator.stdin("missing()").unwrap();

    let text = out.lock().clone();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "42");
    assert_eq!(lines[1], "{\"ok\":true}");
    assert!(lines[2].starts_with("Uncaught"));
}
