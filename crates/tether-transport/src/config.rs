//! WebSocket adapter configuration

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{DEFAULT_EVENT_NAME, DEFAULT_PORT, PORT_ENV};

/// Configuration of [`crate::WebSocketServer`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebSocketServerConfig {
    /// Interface to bind
    pub host: String,
    /// Listening port (0 picks an ephemeral port)
    pub port: u16,
    /// Event name carried by message frames
    pub event_name: String,
    /// Outbound queue depth per connection
    pub send_buffer: usize,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    /// Bind timeout in milliseconds
    pub start_timeout_ms: u64,
}

impl Default for WebSocketServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            event_name: DEFAULT_EVENT_NAME.to_string(),
            send_buffer: 100,
            max_message_size: 64 * 1024, // 64KB
            start_timeout_ms: 10_000,
        }
    }
}

impl WebSocketServerConfig {
    /// Defaults, with the port taken from `PORT` when it is set
    pub fn from_env() -> Self {
        Self::default().with_port_from(std::env::var(PORT_ENV).ok().as_deref())
    }

    fn with_port_from(mut self, value: Option<&str>) -> Self {
        if let Some(raw) = value {
            match raw.trim().parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("ignoring invalid {}={:?}, using port {}", PORT_ENV, raw, self.port),
            }
        }
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = event_name.into();
        self
    }

    /// Address passed to the listener
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}
