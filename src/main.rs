//! WebSocket Chat Server - Entry Point
//!
//! Parses configuration, binds the listener and runs the server until
//! Ctrl+C.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ws_chat_server::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=ws_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ws_chat_server=info")),
        )
        .init();

    let config = ServerConfig::parse();
    let mode = config.mode;

    // A bind failure is the one fatal error
    let server = ChatServer::bind(config).await?;
    info!(
        "WebSocket chat server listening on ws://{}/ws ({:?} mode)",
        server.local_addr()?,
        mode
    );

    tokio::select! {
        _ = server.run() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
        }
    }

    Ok(())
}
