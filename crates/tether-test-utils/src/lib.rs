//! Common test helpers and utilities for Tether tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - Event bus collectors
//! - A minimal WebSocket client speaking the JSON event framing

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tether_core::EventBus;
use tether_transport::{EventFrame, DEFAULT_EVENT_NAME};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type TestError = Box<dyn std::error::Error + Send + Sync>;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
    }
    check()
}

// ============================================================================
// Event Collectors
// ============================================================================

/// Forward every event pushed on `bus` into a channel
pub fn collect<T>(bus: &EventBus<T>) -> mpsc::UnboundedReceiver<T>
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(move |event: &T| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Receive the next collected event or panic after `DEFAULT_TIMEOUT`
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(DEFAULT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ============================================================================
// WebSocket Test Client
// ============================================================================

/// WebSocket client using `{"event", "data"}` frames
pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_name: String,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, TestError> {
        let url = format!("ws://{}", addr);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Self {
            stream,
            event_name: DEFAULT_EVENT_NAME.to_string(),
        })
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = event_name.into();
        self
    }

    /// Send `data` on the client's event name
    pub async fn emit(&mut self, data: Value) -> Result<(), TestError> {
        let event = self.event_name.clone();
        self.emit_event(&event, data).await
    }

    pub async fn emit_event(&mut self, event: &str, data: Value) -> Result<(), TestError> {
        let text = EventFrame::new(event, data).encode()?;
        self.stream.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Next event frame, or None on close / timeout
    pub async fn recv(&mut self, max_wait: Duration) -> Option<EventFrame> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.stream.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    if let Ok(frame) = EventFrame::decode(text.as_bytes()) {
                        return Some(frame);
                    }
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return None,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait until the server closes the connection
    pub async fn wait_closed(&mut self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match timeout(remaining, self.stream.next()).await {
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Close from the client side
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
