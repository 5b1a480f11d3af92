//! Broadcast router
//!
//! A single task consumes published chat messages and fans each one out
//! to every registered session. Delivery never waits: a session whose
//! outbound queue is full or closed is dropped from the registry and told
//! to close, so one slow peer cannot stall the rest.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::Outbound;
use crate::envelope::ChatMessage;
use crate::registry::Registry;
use crate::types::SessionId;

/// Outcome of one fan-out
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions that had the message queued
    pub delivered: usize,
    /// Sessions dropped because they could not take it
    pub evicted: Vec<SessionId>,
}

/// The fan-out half of the chat server
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver `msg` to every session currently registered
    pub fn publish(&self, msg: &ChatMessage) -> Result<Delivery, serde_json::Error> {
        let payload: Arc<str> = msg.to_payload()?.into();
        Ok(self.publish_payload(payload))
    }

    /// Deliver an already-serialized payload
    pub fn publish_payload(&self, payload: Arc<str>) -> Delivery {
        let mut delivery = Delivery::default();

        for client in self.registry.snapshot() {
            match client.try_send(Outbound::Text(Arc::clone(&payload))) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping client {} ({}): {}",
                        client.id,
                        client.display_name(),
                        e
                    );
                    self.registry.unregister(client.id);
                    client.evict();
                    delivery.evicted.push(client.id);
                }
            }
        }

        delivery
    }

    /// Run the router loop
    ///
    /// Continuously receives and publishes messages until all senders are
    /// dropped. One consumer keeps each sender's messages in order.
    pub async fn run(self, mut receiver: mpsc::Receiver<ChatMessage>) {
        info!("Router started");

        while let Some(msg) = receiver.recv().await {
            match self.publish(&msg) {
                Ok(delivery) => debug!(
                    "Message from {} delivered to {}, evicted {}",
                    msg.user,
                    delivery.delivered,
                    delivery.evicted.len()
                ),
                Err(e) => error!("Failed to serialize message: {}", e),
            }
        }

        info!("Router shutting down");
    }
}
