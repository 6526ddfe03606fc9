//! Inverse Battleships Match Server - Entry Point
//!
//! Parses the command line, resolves the listen address, and runs the
//! accept loop until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ibgame_server::net::Listener;
use ibgame_server::registry::Registry;
use ibgame_server::{config, server};

/// TCP match server for the inverse battleships protocol
#[derive(Parser, Debug)]
#[command(name = "ibgame-server", version, about)]
struct Args {
    /// Address to listen on, host:port
    #[arg(short = 'a', long = "socket_address", value_name = "HOST:PORT")]
    socket_address: Option<String>,

    /// Path to a JSON configuration file with server_address and server_port
    #[arg(short = 'c', long = "cfg_path", value_name = "PATH")]
    cfg_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=ibgame_server=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ibgame_server=info")),
        )
        .init();

    // a bare invocation gets the help text, like -h
    if std::env::args().len() <= 1 {
        let _ = Args::command().print_help();
        return;
    }

    let args = Args::parse();

    let addr = match (&args.socket_address, &args.cfg_path) {
        (Some(addr), _) => addr.clone(),
        (None, Some(path)) => match config::load(path) {
            Ok(config) => config.socket_addr(),
            Err(e) => {
                error!("Error loading configuration: {}", e);
                std::process::exit(1);
            }
        },
        (None, None) => {
            error!("No socket address or configuration file provided");
            std::process::exit(1);
        }
    };

    let listener = match Listener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(Registry::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = server::run(listener, registry, shutdown_rx).await {
        error!("Error managing server: {}", e);
        std::process::exit(1);
    }
}
