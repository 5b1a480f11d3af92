//! ChatServer: listener, accept loop and router task
//!
//! Owns the registry and hands it by reference to the router and to every
//! connection task. Nothing here is global.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::{handle_connection, ConnectionContext};
use crate::registry::Registry;
use crate::router::Router;

/// A bound, not yet running, chat server
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<Registry>,
}

impl ChatServer {
    /// Bind the listening socket
    ///
    /// This is the only failure that should end the process.
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.addr).await?;
        Ok(Self {
            listener,
            config,
            registry: Arc::new(Registry::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the live sessions
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Start the router and accept connections forever
    pub async fn run(self) {
        let (publisher, published) = mpsc::channel(self.config.broadcast_capacity);
        tokio::spawn(Router::new(Arc::clone(&self.registry)).run(published));
        info!("Router task started");

        let ctx = Arc::new(ConnectionContext::new(
            &self.config,
            Arc::clone(&self.registry),
            publisher,
        ));

        // Connection accept loop
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    let ctx = Arc::clone(&ctx);

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            warn!("Connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
