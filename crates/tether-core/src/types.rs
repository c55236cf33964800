//! Connection identifiers and message envelopes

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-assigned connection identifier.
///
/// Unique among the open connections of one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Message payload, passed through untouched
pub type Payload = Value;

/// A payload addressed to or received from one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub connection_id: ConnectionId,
    pub payload: Payload,
}

impl MessageEnvelope {
    pub fn new(connection_id: impl Into<ConnectionId>, payload: Payload) -> Self {
        Self {
            connection_id: connection_id.into(),
            payload,
        }
    }
}
