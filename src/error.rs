//! Error types for the chat server
//!
//! Four classes, each with its own blast radius:
//! - `HandshakeError`: the upgrade failed, only that connection attempt dies
//! - `ProtocolError`: a malformed frame, the session is closed
//! - `FormatError`: a bad chat envelope, the frame is dropped
//! - `AppError`: everything a connection task can fail with, including I/O
//!
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Upgrade handshake failures
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Missing or wrong `Connection`/`Upgrade` headers, or not a GET
    #[error("Not a websocket handshake")]
    NotAWebsocketRequest,

    /// `Sec-WebSocket-Key` absent or empty
    #[error("Missing Sec-WebSocket-Key")]
    MissingKey,

    /// Client asked for a protocol version other than 13
    #[error("Unsupported Sec-WebSocket-Version: {0}")]
    UnsupportedVersion(String),

    /// Request head could not be parsed
    #[error("Malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// Server answered with something other than 101
    #[error("Handshake rejected by server: {0}")]
    RejectedByServer(String),

    /// Server's `Sec-WebSocket-Accept` does not match our key
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,

    /// Dial target is not a usable `ws://` URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Socket failure while the handshake was in flight
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame-level protocol violations (fatal to the session)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame uses the 64-bit length tier or is too large to encode
    #[error("Unsupported frame size")]
    UnsupportedFrameSize,

    /// Input ended before the declared frame length
    #[error("Truncated frame")]
    TruncatedFrame,

    /// Opcode outside the RFC 6455 set
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// RSV1-3 set without a negotiated extension
    #[error("Reserved bits set")]
    ReservedBits,

    /// FIN=0; multi-frame messages are not supported
    #[error("Fragmented frames are not supported")]
    Fragmented,

    /// Client sent an unmasked frame
    #[error("Unmasked frame from client")]
    UnmaskedClientFrame,

    /// Server sent a masked frame
    #[error("Masked frame from server")]
    MaskedServerFrame,

    /// Control frame payload above 125 bytes
    #[error("Control frame too large: {0} bytes")]
    ControlFrameTooLarge(usize),

    /// Text frame payload is not UTF-8
    #[error("Text frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Chat envelope errors (recoverable, the frame is dropped)
#[derive(Debug, Error)]
pub enum FormatError {
    /// Not JSON, or a required field is missing
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Join message without a usable name
    #[error("Username must not be empty")]
    EmptyUsername,
}

impl From<serde_json::Error> for FormatError {
    fn from(err: serde_json::Error) -> Self {
        FormatError::InvalidEnvelope(err.to_string())
    }
}

/// Application-level errors
///
/// Anything a connection task can end with. None of these escape a
/// single connection.
#[derive(Debug, Error)]
pub enum AppError {
    /// Upgrade handshake failed
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Frame protocol violation (fatal)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Chat envelope rejected
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer went quiet past a deadline
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,
}

/// Outbound queue errors
///
/// Delivery to a session never waits: a full queue is reported as such
/// and the caller decides what to do with the slow client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The session's outbound queue is at capacity
    #[error("Outbound queue full")]
    QueueFull,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
