//! Adapter-agnostic server core
//!
//! [`ServerCore`] sequences lifecycle commands through the state machine and
//! fans out connection and message events. It never touches the network: a
//! transport adapter subscribes to [`ServerCore::state_changed`], does the real
//! bind / close work when STARTING or STOPPING is entered, and reports back
//! through [`ServerCore::report_started`] and [`ServerCore::report_stopped`].
//!
//! # Example
//!
//! ```
//! use tether_core::{LifecycleState, ServerCore};
//!
//! let server = std::sync::Arc::new(ServerCore::new("example"));
//!
//! // a trivial adapter: binding always succeeds, closing is instant
//! let core = std::sync::Arc::downgrade(&server);
//! server.state_changed().on(LifecycleState::Starting, move |_| {
//!     if let Some(core) = core.upgrade() {
//!         core.report_started(true).unwrap();
//!     }
//! });
//!
//! server.start().unwrap();
//! assert!(server.stop().is_ok());
//! ```

use std::fmt::Display;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::bus::{Dispatcher, EventBus};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleState, StartOutcome, Trigger};
use crate::projection::StateChanged;
use crate::types::{ConnectionId, MessageEnvelope};

/// Outbound delivery, supplied by the transport adapter
pub trait MessageSink: Send + Sync {
    /// Deliver the payload to its connection.
    ///
    /// Returns false when the connection is not registered.
    fn send_message(&self, envelope: MessageEnvelope) -> bool;
}

impl<F> MessageSink for F
where
    F: Fn(MessageEnvelope) -> bool + Send + Sync,
{
    fn send_message(&self, envelope: MessageEnvelope) -> bool {
        self(envelope)
    }
}

pub struct ServerCore {
    name: String,
    state_changed: StateChanged,
    connection_established: EventBus<ConnectionId>,
    connection_dropped: EventBus<ConnectionId>,
    message_received: EventBus<MessageEnvelope>,
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
}

impl ServerCore {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        // one queue for all four streams keeps their deliveries in push order
        let dispatcher = Arc::new(Dispatcher::new());
        let state_changed = StateChanged::with_dispatcher(Arc::clone(&dispatcher));

        let server = name.clone();
        state_changed.on_any(move |t| debug!(server = %server, "{}", t));

        Self {
            name,
            state_changed,
            connection_established: EventBus::with_dispatcher(
                "connectionEstablished",
                Arc::clone(&dispatcher),
            ),
            connection_dropped: EventBus::with_dispatcher(
                "connectionDropped",
                Arc::clone(&dispatcher),
            ),
            message_received: EventBus::with_dispatcher("messageReceived", dispatcher),
            sink: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// STOPPED -> STARTING. Returns once the transition is published; the
    /// outcome arrives later as ->LISTENING or ->STOPPED.
    pub fn start(&self) -> Result<()> {
        self.state_changed.fire(Trigger::Start).map(drop)
    }

    /// LISTENING -> STOPPING. Completion arrives later as ->STOPPED.
    pub fn stop(&self) -> Result<()> {
        self.state_changed.fire(Trigger::Stop).map(drop)
    }

    /// Start and wait for the outcome of the attempt.
    pub async fn start_and_wait(&self) -> Result<StartOutcome> {
        let (id, rx) = self
            .state_changed
            .next_into(&[LifecycleState::Listening, LifecycleState::Stopped]);
        if let Err(e) = self.start() {
            self.state_changed.unsubscribe(id);
            return Err(e);
        }
        let transition = rx.await.map_err(|_| Error::SubscriptionClosed)?;
        Ok(StartOutcome::from(transition.to == LifecycleState::Listening))
    }

    /// Stop and wait until STOPPED is reached.
    pub async fn stop_and_wait(&self) -> Result<()> {
        let (id, rx) = self.state_changed.next_into(&[LifecycleState::Stopped]);
        if let Err(e) = self.stop() {
            self.state_changed.unsubscribe(id);
            return Err(e);
        }
        rx.await.map(drop).map_err(|_| Error::SubscriptionClosed)
    }

    /// Deliver a payload through the adapter.
    ///
    /// False means the connection is not registered (or no adapter is installed),
    /// which is a routine race with disconnects rather than an error.
    pub fn send_message(&self, envelope: MessageEnvelope) -> bool {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink.send_message(envelope),
            None => {
                warn!(server = %self.name, "send_message called without a message sink installed");
                false
            }
        }
    }

    // =========================================================================
    // Adapter surface
    // =========================================================================

    /// Install the adapter's outbound delivery function
    pub fn install_sink(&self, sink: Arc<dyn MessageSink>) {
        *self.sink.write() = Some(sink);
    }

    /// STARTING -> LISTENING on success, STARTING -> STOPPED on failure
    pub fn report_started(&self, success: bool) -> Result<()> {
        self.state_changed
            .fire(Trigger::StartFinished(StartOutcome::from(success)))
            .map(drop)
    }

    /// Report a start attempt from its result, logging the failure
    pub fn report_start_result<E: Display>(&self, result: std::result::Result<(), E>) -> Result<()> {
        if let Err(e) = &result {
            warn!(server = %self.name, "start failed: {}", e);
        }
        self.report_started(result.is_ok())
    }

    /// STOPPING -> STOPPED
    pub fn report_stopped(&self) -> Result<()> {
        self.state_changed.fire(Trigger::StopCompleted).map(drop)
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn state_changed(&self) -> &StateChanged {
        &self.state_changed
    }

    pub fn connection_established(&self) -> &EventBus<ConnectionId> {
        &self.connection_established
    }

    pub fn connection_dropped(&self) -> &EventBus<ConnectionId> {
        &self.connection_dropped
    }

    pub fn message_received(&self) -> &EventBus<MessageEnvelope> {
        &self.message_received
    }
}

impl Default for ServerCore {
    fn default() -> Self {
        Self::new("server")
    }
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCore")
            .field("name", &self.name)
            .field("state", &self.state_changed.state())
            .field("has_sink", &self.sink.read().is_some())
            .finish()
    }
}
