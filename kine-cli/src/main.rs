//! Thin supervisor binary: loads config, sets up logging, starts
//! [`kine::supervisor::Supervisor`], and drains it on SIGINT/SIGTERM.

mod config;
mod trace;

use anyhow::Result;
use clap::Parser;
use kine::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::Args::parse();

    let log_dir = format!("{}/.kine", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level)?;

    let cfg = config::load(&args)?;
    tracing::info!(db_url = %cfg.db_url, "kine-cli starting");

    let supervisor = Supervisor::start(&cfg).await?;
    tracing::info!("supervisor running, awaiting shutdown signal");

    wait_for_shutdown_signal().await;

    supervisor.shutdown().await?;
    tracing::info!("kine-cli exiting");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to register SIGQUIT handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = term.recv() => tracing::info!("received SIGTERM"),
        _ = quit.recv() => tracing::info!("received SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received Ctrl-C");
}
