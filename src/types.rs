//! Basic type definitions for the chat server
//!
//! - `SessionId`: UUID-based unique session identifier
//! - `Role`: which end of the connection this process plays
//! - `close_code`: status codes carried in Close frames

use uuid::Uuid;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4; never derived from anything the peer controls.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local side of a connection
///
/// Decides masking: clients mask what they send and expect unmasked
/// frames back, servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether frames written by this side must be masked
    pub fn masks_outbound(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether frames read by this side must arrive masked
    pub fn expects_masked_inbound(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Close frame status codes (RFC 6455 section 7.4.1)
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const POLICY_VIOLATION: u16 = 1008;

    /// Whether `code` may appear in a Close frame on the wire
    ///
    /// 1004, 1005, 1006 and 1015 are reserved for local use, as is
    /// anything below 1000 or in 1016..3000.
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Code to answer a peer's Close with
    pub fn reply_to(received: Option<u16>) -> u16 {
        match received {
            Some(code) if is_sendable(code) => code,
            _ => NORMAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_role_masking_direction() {
        assert!(Role::Client.masks_outbound());
        assert!(!Role::Client.expects_masked_inbound());
        assert!(!Role::Server.masks_outbound());
        assert!(Role::Server.expects_masked_inbound());
    }

    #[test]
    fn test_close_reply_never_uses_reserved_codes() {
        assert_eq!(close_code::reply_to(Some(1001)), 1001);
        assert_eq!(close_code::reply_to(Some(4000)), 4000);
        assert_eq!(close_code::reply_to(None), close_code::NORMAL);
        for reserved in [999, 1004, 1005, 1006, 1015, 2000, 5000] {
            assert_eq!(close_code::reply_to(Some(reserved)), close_code::NORMAL);
        }
    }
}
