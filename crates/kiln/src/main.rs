//! Kiln
//!
//! Boots a scripting runtime, runs the given scripts and optionally drops
//! into a REPL.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use kiln_core::Topic;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kiln::cli::Args;
use kiln::plugins::{ReplPlugin, SourcesPlugin, SplashPlugin};

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("kiln: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main()) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn async_main() -> Result<ExitCode> {
    // Logs go to stderr so stdout only carries interpreter output.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_runtimes {
        for name in kiln::builtin_backends().names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!("Starting kiln v{}", env!("CARGO_PKG_VERSION"));

    let sources = args
        .eval
        .iter()
        .fold(SourcesPlugin::new(), |plugin, code| plugin.snippet(code.as_str()));
    let sources = args
        .scripts
        .iter()
        .fold(sources, |plugin, src| plugin.script(src.as_str()));

    let mut builder = kiln::builder(&args.base_dir)
        .plugin(SplashPlugin::stderr())
        .plugin(sources);
    if args.repl {
        builder = builder.plugin(ReplPlugin);
    }
    let mut coordinator = builder.build();

    coordinator.bus().subscribe(Topic::Print, kiln::print_to(std::io::stdout()));

    if let Err(e) = coordinator.run(args.overrides()?).await {
        error!("Boot failed: {e}");
        return Ok(ExitCode::FAILURE);
    }
    info!(
        runtime = coordinator.active_runtime().as_deref().unwrap_or_default(),
        "Scripts finished"
    );

    if coordinator.config().get_bool("repl") == Some(true) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if let Err(e) = coordinator.stdin(&line) {
                error!("{e}");
            }
        }
    }

    let failures = coordinator.eval_failures();
    if failures > 0 {
        error!(failures, "Some scripts raised errors");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
