//! Adapter contract

use tether_core::{ConnectionId, Payload};

use crate::error::Result;

/// A live connection as seen by the connection registry
pub trait ConnectionHandle: Send + Sync {
    /// Identifier assigned on accept
    fn id(&self) -> &ConnectionId;

    /// Queue a payload for delivery to the peer
    fn send(&self, payload: &Payload) -> Result<()>;

    /// Check if the connection is still open
    fn is_connected(&self) -> bool;

    /// Close the connection, regardless of its current state
    fn close(&self) -> Result<()>;
}
