//! Elm Bridge Server
//!
//! Runs the Elm REPL and reactor for one workspace on behalf of an editor.
//! Editors connect over WebSocket to start, stop and feed the sessions and
//! receive their transcripts.

mod config;
mod facade;
mod output;
mod process;
mod server;
mod toolchain;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use process::TokioSpawner;
use server::{ServerConfig, SessionHandler, WebSocketServer};

/// Elm Bridge Server
///
/// Elm REPL and reactor sessions for editors
#[derive(Parser, Debug)]
#[command(name = "elm-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging, RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Elm Bridge v{}", env!("CARGO_PKG_VERSION"));

    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    if !workspace.is_dir() {
        warn!("Workspace {} is not a directory", workspace.display());
    }

    // Create server configuration
    let config = ServerConfig::new(args.bind, args.port);
    let handler = SessionHandler::new(workspace, Arc::new(TokioSpawner));

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(config, handler));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
