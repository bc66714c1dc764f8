//! JavaScript Global Objects
//!
//! Registers `print`, `console` and the `kiln` namespace in a context.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_core::Output;
use parking_lot::Mutex;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Result as JsResult, Value};

/// Virtual filesystem shared between the backend and its globals
pub(crate) type Vfs = Arc<Mutex<BTreeMap<String, String>>>;

/// Register every global the backend exposes
pub(crate) fn register_globals<'js>(ctx: &Ctx<'js>, output: &Output, files: &Vfs) -> JsResult<()> {
    let globals = ctx.globals();

    let out = output.clone();
    globals.set(
        "print",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            out.writeln(&join(args));
        })?,
    )?;

    register_console(ctx, output)?;
    register_kiln(ctx, files)?;
    Ok(())
}

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `console.log` writes to the interpreter output; the other levels go to
/// the log.
fn register_console<'js>(ctx: &Ctx<'js>, output: &Output) -> JsResult<()> {
    let console = Object::new(ctx.clone())?;

    let out = output.clone();
    console.set(
        "log",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            out.writeln(&join(args));
        })?,
    )?;

    console.set(
        "info",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: "kiln.js.console", "{}", join(args));
        })?,
    )?;

    console.set(
        "warn",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::warn!(target: "kiln.js.console", "{}", join(args));
        })?,
    )?;

    console.set(
        "error",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::error!(target: "kiln.js.console", "{}", join(args));
        })?,
    )?;

    console.set(
        "debug",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::debug!(target: "kiln.js.console", "{}", join(args));
        })?,
    )?;

    ctx.globals().set("console", console)
}

/// The `kiln` namespace: access to files installed by the host
fn register_kiln<'js>(ctx: &Ctx<'js>, files: &Vfs) -> JsResult<()> {
    let kiln = Object::new(ctx.clone())?;
    kiln.set("runtime", crate::NAME)?;

    let vfs = Arc::clone(files);
    kiln.set(
        "readFile",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, path: String| -> JsResult<String> {
            match vfs.lock().get(&path) {
                Some(content) => Ok(content.clone()),
                None => Err(Exception::throw_message(&ctx, &format!("no such file: {path}"))),
            }
        })?,
    )?;

    let vfs = Arc::clone(files);
    kiln.set(
        "files",
        Function::new(ctx.clone(), move || -> Vec<String> {
            vfs.lock().keys().cloned().collect()
        })?,
    )?;

    // Evaluate an installed file as a global script
    let vfs = Arc::clone(files);
    kiln.set(
        "load",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, path: String| -> JsResult<()> {
            let code = vfs.lock().get(&path).cloned();
            match code {
                Some(code) => ctx.eval::<(), _>(code),
                None => Err(Exception::throw_message(&ctx, &format!("no such file: {path}"))),
            }
        })?,
    )?;

    ctx.globals().set("kiln", kiln)
}

/// Text for the value of a REPL line, `None` for `undefined`
pub(crate) fn display<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<String> {
    if value.is_undefined() {
        return None;
    }
    if value.is_function() {
        return Some("[Function]".into());
    }
    if let Ok(Some(json)) = ctx.json_stringify(value.clone()) {
        if let Ok(text) = json.to_string() {
            return Some(text);
        }
    }
    value.get::<Coerced<String>>().ok().map(|text| text.0)
}

/// Message of the pending exception after a failed call
pub(crate) fn describe<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        let message = exception.message().unwrap_or_default();
        return match exception.stack() {
            Some(stack) if !stack.is_empty() => format!("{message}\n{stack}"),
            _ => message,
        };
    }
    caught
        .get::<Coerced<String>>()
        .map(|text| text.0)
        .unwrap_or_else(|_| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn with_globals<F>(f: F)
    where
        F: FnOnce(Ctx<'_>, &Output, &Vfs),
    {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let output = Output::new();
        let files: Vfs = Arc::default();
        context.with(|ctx| {
            register_globals(&ctx, &output, &files).unwrap();
            f(ctx, &output, &files);
        });
    }

    #[test]
    fn test_print_and_console_log_write_output() {
        with_globals(|ctx, output, _| {
            let _: () = ctx.eval("print('a', 1, true); console.log('b')").unwrap();
            let _: () = ctx.eval("console.warn('to the log only')").unwrap();
            assert_eq!(output.take(), "a 1 true\nb\n");
        });
    }

    #[test]
    fn test_read_file() {
        with_globals(|ctx, _, files| {
            files.lock().insert("data.txt".into(), "hello".into());
            let text: String = ctx.eval("kiln.readFile('data.txt')").unwrap();
            assert_eq!(text, "hello");

            let names: Vec<String> = ctx.eval("kiln.files()").unwrap();
            assert_eq!(names, vec!["data.txt"]);

            let err = ctx.eval::<String, _>("kiln.readFile('nope')").unwrap_err();
            assert!(describe(&ctx, err).contains("no such file: nope"));
        });
    }

    #[test]
    fn test_load_runs_installed_file() {
        with_globals(|ctx, _, files| {
            files
                .lock()
                .insert("lib.js".into(), "globalThis.answer = 42;".into());
            let answer: i32 = ctx.eval("kiln.load('lib.js'); answer").unwrap();
            assert_eq!(answer, 42);
        });
    }

    #[test]
    fn test_display() {
        with_globals(|ctx, _, _| {
            let show = |code: &str| {
                let value: Value = ctx.eval(code).unwrap();
                display(&ctx, value)
            };
            assert_eq!(show("undefined"), None);
            assert_eq!(show("1 + 2"), Some("3".into()));
            assert_eq!(show("'hi'"), Some("\"hi\"".into()));
            assert_eq!(show("({a: [1, 2]})"), Some("{\"a\":[1,2]}".into()));
            assert_eq!(show("(function () {})"), Some("[Function]".into()));
        });
    }

    #[test]
    fn test_describe_thrown_values() {
        with_globals(|ctx, _, _| {
            let err = ctx.eval::<(), _>("throw new TypeError('bad input')").unwrap_err();
            assert!(describe(&ctx, err).starts_with("bad input"));

            let err = ctx.eval::<(), _>("throw 7").unwrap_err();
            assert_eq!(describe(&ctx, err), "7");
        });
    }
}
