//! Tether Core
//!
//! Transport-independent server lifecycle for bidirectional messaging servers.
//!
//! This crate provides:
//! - The lifecycle state machine ([`LifecycleState`], [`Trigger`], [`LifecycleMachine`])
//! - Push-based event buses with FIFO delivery ([`EventBus`], [`Dispatcher`])
//! - Lifecycle transitions as an event stream ([`StateChanged`])
//! - The server core that transport adapters plug into ([`ServerCore`], [`MessageSink`])

pub mod bus;
pub mod error;
pub mod lifecycle;
pub mod projection;
pub mod server;
pub mod types;

pub use bus::{Dispatcher, EventBus, SubscriptionId};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleMachine, LifecycleState, StartOutcome, Transition, Trigger};
pub use projection::StateChanged;
pub use server::{MessageSink, ServerCore};
pub use types::{ConnectionId, MessageEnvelope, Payload};
