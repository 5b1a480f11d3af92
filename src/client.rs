//! Client struct definition
//!
//! A registered session as seen by the registry and router: its id, the
//! declared user, the sending end of its outbound queue and the signal
//! used to tell its connection task it has been evicted.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use crate::error::SendError;
use crate::types::SessionId;

/// Work for a session's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized chat message, shared across recipients
    Text(Arc<str>),
    /// Reply to a Ping
    Pong(Vec<u8>),
    /// Send a Close frame with this code, then stop writing
    Close(u16),
}

/// Connected client information
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Username: the join name in advanced mode; in relaxed mode the
    /// registry entry learns it from the first envelope
    pub user: Option<String>,
    sender: mpsc::Sender<Outbound>,
    eviction: Arc<Notify>,
}

impl Client {
    /// Create a new client with the given ID and outbound queue
    pub fn new(id: SessionId, user: Option<String>, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            user,
            sender,
            eviction: Arc::new(Notify::new()),
        }
    }

    /// Queue a message without waiting
    pub fn try_send(&self, msg: Outbound) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this client
    ///
    /// Returns the username if set, otherwise "anonymous".
    pub fn display_name(&self) -> &str {
        self.user.as_deref().unwrap_or("anonymous")
    }

    /// Tell the connection task to close this session
    ///
    /// The signal is kept if nobody is waiting yet.
    pub fn evict(&self) {
        self.eviction.notify_one();
    }

    /// Resolves once [`Client::evict`] has been called
    pub async fn evicted(&self) {
        self.eviction.notified().await;
    }
}
