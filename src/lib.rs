//! WebSocket Broadcast Chat Server Library
//!
//! A learning-oriented chat server that speaks RFC 6455 without a
//! WebSocket library: the upgrade handshake and the frame codec are
//! implemented here on top of raw tokio TCP streams.
//!
//! # Features
//! - HTTP upgrade handshake (server accept and client dial)
//! - Frame codec for the 7-bit and 16-bit length tiers, with masking,
//!   driven through `tokio_util::codec`
//! - Echo, relaxed broadcast and username-first broadcast modes
//! - JSON chat envelope with server-assigned RFC3339 timestamps
//! - Non-blocking fan-out that drops clients whose queue is full
//! - Handshake and idle read deadlines
//!
//! # Architecture
//! - `ChatServer` owns the `Registry` and spawns the `Router` task
//! - Each connection runs a reader loop plus a writer task fed by a
//!   bounded queue; only the writer touches the socket
//! - The router snapshots the registry and `try_send`s to every queue
//!
//! # Example
//! ```ignore
//! use ws_chat_server::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(ServerConfig::default()).await.unwrap();
//!     server.run().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, Outbound};
pub use codec::FrameCodec;
pub use config::{ChatMode, ClientConfig, ServerConfig};
pub use envelope::ChatMessage;
pub use error::{AppError, FormatError, HandshakeError, ProtocolError, SendError};
pub use frame::{Frame, Opcode};
pub use handler::handle_connection;
pub use handshake::{compute_accept_key, dial, negotiate};
pub use registry::Registry;
pub use router::{Delivery, Router};
pub use server::ChatServer;
pub use session::{Received, Session, SessionReader, SessionWriter, TcpSession};
pub use types::{Role, SessionId};
