//! # fanout-worker
//!
//! One worker process: loads settings, starts the lifespan, serves HTTP and
//! WebSocket traffic, and drains the cluster on SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fanout_server::{Lifespan, bind, metrics, router, serve};
use fanout_settings::{FanoutSettings, load_settings, load_settings_from_path};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fanout WebSocket worker.
#[derive(Parser, Debug)]
#[command(name = "fanout-worker", about = "Fanout WebSocket worker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,
}

/// Layer CLI flags over file, env, and default settings.
fn resolve_settings(cli: &Cli) -> Result<FanoutSettings> {
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    Ok(settings)
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for ctrl-c")?;
                info!("received SIGINT");
            }
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        info!("received ctrl-c");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    fanout_logging::init_subscriber(&settings.logging);

    let prometheus = metrics::install_recorder().context("Failed to install metrics recorder")?;

    let lifespan = Lifespan::start(&settings)
        .await
        .context("Failed to start worker")?;

    let listener = bind(&settings.server.host, settings.server.port)
        .await
        .context("Failed to bind server")?;
    let stop_accepting = CancellationToken::new();
    let app = router(lifespan.app_state().with_metrics(prometheus));
    let mut server = tokio::spawn(serve(listener, app, stop_accepting.clone()));

    tokio::select! {
        res = shutdown_signal() => res?,
        res = &mut server => {
            // the listener died on its own; still drain what is connected
            match res {
                Ok(Ok(())) => warn!("server stopped unexpectedly"),
                Ok(Err(e)) => warn!(error = %e, "server failed"),
                Err(e) => warn!(error = %e, "server task panicked"),
            }
        }
    }

    info!("shutting down");
    stop_accepting.cancel();
    if !server.is_finished() {
        let _ = server.await;
    }

    let report = lifespan.shutdown().await;
    info!(drain = ?report.drain, relay = ?report.relay_exit, "worker exited");
    Ok(())
}
