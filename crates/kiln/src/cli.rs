//! Command line arguments

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use kiln_core::Overrides;
use serde_json::{Map, Value};

/// Boot an embedded scripting runtime and run scripts in it
#[derive(Parser, Debug, Default)]
#[command(name = "kiln")]
#[command(about = "Run scripts in an embedded QuickJS or Lua runtime", long_about = None)]
pub struct Args {
    /// Script files or URLs, run in order after any --eval snippets
    pub scripts: Vec<String>,

    /// Inline code to run (repeatable)
    #[arg(short, long = "eval", value_name = "CODE")]
    pub eval: Vec<String>,

    /// Config file (.json or .toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override one option, e.g. --set memory_limit=1048576
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Runtime to boot (shorthand for --set runtime=NAME)
    #[arg(short, long)]
    pub runtime: Option<String>,

    /// Read lines from stdin into the runtime after boot
    #[arg(long)]
    pub repl: bool,

    /// Don't show the splash line
    #[arg(short, long)]
    pub quiet: bool,

    /// List the bundled runtimes and exit
    #[arg(long)]
    pub list_runtimes: bool,

    /// Directory relative script paths and file URLs resolve against
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,
}

impl Args {
    /// Config overrides: the config file first, then `--runtime`, then each
    /// `--set` in order
    pub fn overrides(&self) -> Result<Overrides> {
        let mut map = match &self.config {
            Some(path) => Overrides::from_path(path)
                .and_then(Overrides::into_map)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => Map::new(),
        };

        if let Some(runtime) = &self.runtime {
            map.insert("runtime".into(), Value::String(runtime.clone()));
        }
        for assignment in &self.set {
            let (key, value) = parse_assignment(assignment)?;
            map.insert(key, value);
        }
        if self.quiet {
            map.insert("splash".into(), Value::String(String::new()));
        }

        Ok(Overrides::Map(map))
    }
}

/// Split `key=value`. The value is read as JSON when it parses, otherwise as
/// a plain string.
pub fn parse_assignment(text: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = text.split_once('=') else {
        bail!("expected KEY=VALUE, got '{text}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty option name in '{text}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("memory_limit=1024").unwrap(),
            ("memory_limit".into(), json!(1024))
        );
        assert_eq!(
            parse_assignment("runtime=lua").unwrap(),
            ("runtime".into(), json!("lua"))
        );
        assert_eq!(
            parse_assignment(r#"files={"a.lua": "lib/a.lua"}"#).unwrap().1,
            json!({"a.lua": "lib/a.lua"})
        );
        assert_eq!(parse_assignment("splash=").unwrap().1, json!(""));
        assert!(parse_assignment("nothing").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_overrides_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, "runtime = \"quickjs\"\nmemory_limit = 1\n").unwrap();

        let args = Args {
            config: Some(path),
            runtime: Some("lua".into()),
            set: vec!["memory_limit=2048".into()],
            quiet: true,
            ..Default::default()
        };
        let Overrides::Map(map) = args.overrides().unwrap() else {
            panic!("expected a map");
        };
        assert_eq!(map.get("runtime"), Some(&json!("lua")));
        assert_eq!(map.get("memory_limit"), Some(&json!(2048)));
        assert_eq!(map.get("splash"), Some(&json!("")));
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args {
            config: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        let err = args.overrides().unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }

    #[test]
    fn test_parse_command_line() {
        let args = Args::parse_from(["kiln", "-e", "print(1)", "--set", "a=1", "main.js", "-r", "lua"]);
        assert_eq!(args.eval, vec!["print(1)"]);
        assert_eq!(args.scripts, vec!["main.js"]);
        assert_eq!(args.set, vec!["a=1"]);
        assert_eq!(args.runtime.as_deref(), Some("lua"));
        assert!(!args.repl);
    }
}
