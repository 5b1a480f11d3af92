//! Connection registry
//!
//! The set of sessions eligible for broadcasts. One mutex guards the map;
//! callers take a snapshot and do their network work after the lock is
//! released.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::client::Client;
use crate::types::SessionId;

#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<SessionId, Client>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Client>> {
        // the map stays consistent even if a holder panicked
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session; returns the new member count
    pub fn register(&self, client: Client) -> usize {
        let mut clients = self.lock();
        debug!("Registering {} as {}", client.id, client.display_name());
        clients.insert(client.id, client);
        clients.len()
    }

    /// Remove a session; `None` if it was already gone
    pub fn unregister(&self, id: SessionId) -> Option<Client> {
        self.lock().remove(&id)
    }

    /// Record the user a session speaks as
    ///
    /// Only the first name sticks; returns whether this call set it.
    pub fn set_user(&self, id: SessionId, user: &str) -> bool {
        match self.lock().get_mut(&id) {
            Some(client) if client.user.is_none() => {
                client.user = Some(user.to_string());
                true
            }
            _ => false,
        }
    }

    /// Copy of every registered client, for iteration without the lock
    pub fn snapshot(&self) -> Vec<Client> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Display names of everyone registered, sorted
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .lock()
            .values()
            .map(|c| c.display_name().to_string())
            .collect();
        users.sort();
        users
    }
}
