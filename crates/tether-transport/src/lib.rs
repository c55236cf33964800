//! Tether Transport Layer
//!
//! Transport adapters bind the lifecycle of a [`tether_core::ServerCore`] to
//! real accept / close operations and keep the connection registry:
//! - [`ConnectionHandle`] and [`ConnectionRegistry`], the adapter contract
//! - [`WebSocketServer`], the reference adapter (JSON event frames over WebSocket)

pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::WebSocketServerConfig;
pub use error::{Result, TransportError};
pub use frame::EventFrame;
pub use registry::ConnectionRegistry;
pub use traits::ConnectionHandle;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketServer};

/// Port used when neither configuration nor `PORT` provides one
pub const DEFAULT_PORT: u16 = 8888;

/// Event name used to demultiplex message frames
pub const DEFAULT_EVENT_NAME: &str = "message";

/// Environment variable holding the listening port
pub const PORT_ENV: &str = "PORT";
