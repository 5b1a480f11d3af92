//! Command line / environment configuration
//!
//! Every option can also be set through a `WS_CHAT_*` environment variable.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default URL the client dials
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";

/// What the server does with each text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChatMode {
    /// Echo every text frame back to its sender
    Echo,
    /// Broadcast `{user, text}` envelopes; bad envelopes are dropped
    Relaxed,
    /// First message declares the user; later envelopes only carry text
    Advanced,
}

/// Server settings
#[derive(Debug, Clone, Parser)]
#[command(name = "ws_chat_server", version, about = "WebSocket broadcast chat server")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(env = "WS_CHAT_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Session behaviour
    #[arg(long, env = "WS_CHAT_MODE", value_enum, default_value_t = ChatMode::Relaxed)]
    pub mode: ChatMode,

    /// Seconds a peer may stay silent before it is disconnected
    #[arg(long, env = "WS_CHAT_READ_TIMEOUT_SECS", default_value_t = 300)]
    pub read_timeout_secs: u64,

    /// Seconds allowed for the upgrade handshake
    #[arg(long, env = "WS_CHAT_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Per-session outbound queue length; a full queue drops the client
    #[arg(long, env = "WS_CHAT_OUTBOUND_CAPACITY", default_value_t = 32)]
    pub outbound_capacity: usize,

    /// Length of the queue feeding the broadcast router
    #[arg(long, env = "WS_CHAT_BROADCAST_CAPACITY", default_value_t = 256)]
    pub broadcast_capacity: usize,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            mode: ChatMode::Relaxed,
            read_timeout_secs: 300,
            handshake_timeout_secs: 10,
            outbound_capacity: 32,
            broadcast_capacity: 256,
        }
    }
}

/// Terminal client settings
#[derive(Debug, Clone, Parser)]
#[command(name = "ws_chat_client", version, about = "Terminal client for ws_chat_server")]
pub struct ClientConfig {
    /// Server URL
    #[arg(env = "WS_CHAT_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Username; prompted for when absent
    #[arg(long, short, env = "WS_CHAT_USER")]
    pub user: Option<String>,

    /// Mode the server runs in; only advanced mode expects a join message
    #[arg(long, env = "WS_CHAT_MODE", value_enum, default_value_t = ChatMode::Relaxed)]
    pub mode: ChatMode,
}
