//! Sentinel Daemon - Display Orchestration Process
//!
//! Loads the configuration, builds the frame driver with the built-in module
//! and service kinds, and ticks it at the configured rate until interrupted.
//! Each time the text frame changes it is printed to stdout; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Start with the configuration found by the usual lookup
//! sentinel-daemon
//!
//! # Explicit configuration file, faster ticking
//! sentinel-daemon --config sentinel.example.toml --fps 60
//!
//! # Show the effective configuration and exit
//! sentinel-daemon --config sentinel.example.toml --print-config
//!
//! # Verbose logging
//! sentinel-daemon --verbose
//! RUST_LOG=sentinel_core=trace sentinel-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: Configuration file path (when `--config` is absent)
//! - `SENTINEL_FPS`: Tick rate override
//! - `RUST_LOG`: Log filter
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (services get `shutdown_timeout_secs`)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use sentinel_core::{
    clock::SystemClock,
    config::{load_config, LoadedConfig},
    FrameDriver, ModuleFactories, ServiceFactories,
};

/// Sentinel Daemon - event-driven display orchestration
#[derive(Parser, Debug)]
#[command(name = "sentinel-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Frame rate override
    #[arg(long, env = "SENTINEL_FPS", value_name = "N")]
    fps: Option<u32>,

    /// Debug logging for the sentinel crates
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("sentinel_daemon={level}").parse()?)
                .add_directive(format!("sentinel_core={level}").parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// The configuration as TOML, preceded by its source and any skipped entries
fn render_config(loaded: &LoadedConfig) -> Result<String> {
    let mut out = String::new();
    match &loaded.path {
        Some(path) => out.push_str(&format!("# source: {} ({})\n", loaded.source, path.display())),
        None => out.push_str(&format!("# source: {}\n", loaded.source)),
    }
    for diagnostic in &loaded.diagnostics {
        out.push_str(&format!("# skipped: {diagnostic}\n"));
    }
    out.push('\n');
    out.push_str(
        &loaded
            .config
            .to_toml_string()
            .context("Failed to serialize configuration")?,
    );
    Ok(out)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(fps) = args.fps {
        loaded.config.core.fps = fps;
    }

    if args.print_config {
        print!("{}", render_config(&loaded)?);
        return Ok(());
    }

    info!(
        source = %loaded.source,
        modules = loaded.config.modules.len(),
        services = loaded.config.services.len(),
        fps = loaded.config.core.fps,
        "Starting Sentinel Daemon"
    );

    let mut driver = FrameDriver::new(
        loaded.config,
        ModuleFactories::with_builtins(),
        ServiceFactories::with_builtins(),
        SystemClock::shared(),
    );

    let report = driver.start();
    for failure in &report.build_failures {
        warn!(error = %failure, "Component skipped");
    }
    if driver.registry().is_empty() {
        warn!("No modules configured; nothing will be displayed");
    }

    let mut last = String::new();
    let summary = driver
        .run(shutdown_signal(), |frame, outcome| {
            let rendered = frame.to_string();
            if rendered != last {
                println!(
                    "--- {} ---\n{rendered}",
                    outcome.dispatch.module.as_deref().unwrap_or("-")
                );
                last = rendered;
            }
        })
        .await;

    if summary.abandoned.is_empty() {
        info!(stopped = summary.stopped.len(), "Sentinel Daemon stopped");
    } else {
        warn!(abandoned = ?summary.abandoned, "Sentinel Daemon stopped, services abandoned");
    }
    Ok(())
}
