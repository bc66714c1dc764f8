//! Lua backend booted through the coordinator

use std::sync::Arc;

use kiln_core::{Coordinator, Event, EventBus, MemoryFetcher, Overrides, ScriptRecord, Topic};
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
        .backend(kiln_lua::descriptor())
        .fetcher(fetcher.with(kiln_lua::PRELUDE_URL, kiln_lua::PRELUDE))
        .build()
}

fn lua_config(extra: serde_json::Value) -> Overrides {
    let mut map = serde_json::Map::new();
    map.insert("runtime".into(), json!("Lua"));
    if let serde_json::Value::Object(extra) = extra {
        map.extend(extra);
    }
    Overrides::Map(map)
}

#[tokio::test]
async fn test_require_installed_module() {
    let fetcher = MemoryFetcher::new().with(
        "http://x/greet.lua",
        "local M = {}\nfunction M.hello(who) return 'hello ' .. who end\nreturn M\n",
    );
    let mut coordinator = coordinator(fetcher);
    let out = printed(coordinator.bus());

    coordinator
        .discover(ScriptRecord::inline(
            "print(require('lib.greet').hello('lua'), kiln.exists('lib/greet.lua'))",
        ))
        .unwrap();
    coordinator
        .run(lua_config(json!({ "files": { "lib/greet.lua": "http://x/greet.lua" } })))
        .await
        .unwrap();

    assert_eq!(coordinator.active_runtime().as_deref(), Some("lua"));
    assert_eq!(*out.lock(), "hello lua\ttrue\n");
}

#[tokio::test]
async fn test_runtime_error_is_counted() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    coordinator
        .discover(ScriptRecord::inline("error('boom')"))
        .unwrap();
    coordinator
        .discover(ScriptRecord::inline("print('still runs')"))
        .unwrap();
    let out = printed(coordinator.bus());
    coordinator.run(lua_config(json!({}))).await.unwrap();

    assert_eq!(coordinator.eval_failures(), 1);
    assert_eq!(*out.lock(), "still runs\n");
}

#[tokio::test]
async fn test_repl_tries_expression_first() {
    let mut coordinator = coordinator(MemoryFetcher::new());
    let out = printed(coordinator.bus());
    coordinator.run(lua_config(json!({}))).await.unwrap();

    coordinator.start_repl().unwrap();
    coordinator.stdin("x = 20").unwrap();
    coordinator.stdin("x * 2 + 2").unwrap();
    coordinator.stdin("1, 'a'").unwrap();
    coordinator.stdin("nosuch.field").unwrap();

    let text = out.lock().clone();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "42");
    assert_eq!(lines[1], "1\ta");
    assert!(lines[2].starts_with("error:"));
}
