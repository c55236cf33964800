//! Error types for Tether

use thiserror::Error;

use crate::lifecycle::{LifecycleState, Trigger};

/// Result type alias for Tether core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tether core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Trigger is not accepted in the current lifecycle state
    #[error("invalid transition: {trigger} is not accepted in state {state}")]
    InvalidTransition {
        state: LifecycleState,
        trigger: Trigger,
    },

    /// State tag could not be parsed (expected "->STATE")
    #[error("invalid state tag: {0}")]
    InvalidTag(String),

    /// An awaited lifecycle event can no longer be delivered
    #[error("subscription closed before the awaited event arrived")]
    SubscriptionClosed,
}
