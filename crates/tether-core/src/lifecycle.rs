//! Server lifecycle state machine
//!
//! Four states and five transitions:
//!
//! | From      | Trigger                  | To        |
//! |-----------|--------------------------|-----------|
//! | STOPPED   | Start                    | STARTING  |
//! | STARTING  | StartFinished(Succeeded) | LISTENING |
//! | STARTING  | StartFinished(Failed)    | STOPPED   |
//! | LISTENING | Stop                     | STOPPING  |
//! | STOPPING  | StopCompleted            | STOPPED   |
//!
//! Everything else is rejected with [`Error::InvalidTransition`] and leaves the
//! state untouched. The machine does no I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 4] = [
        LifecycleState::Stopped,
        LifecycleState::Starting,
        LifecycleState::Listening,
        LifecycleState::Stopping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Listening => "LISTENING",
            LifecycleState::Stopping => "STOPPING",
        }
    }

    /// Apply a trigger, returning the destination state
    pub fn apply(self, trigger: Trigger) -> Result<LifecycleState> {
        use LifecycleState::*;

        match (self, trigger) {
            (Stopped, Trigger::Start) => Ok(Starting),
            (Starting, Trigger::StartFinished(StartOutcome::Succeeded)) => Ok(Listening),
            (Starting, Trigger::StartFinished(StartOutcome::Failed)) => Ok(Stopped),
            (Listening, Trigger::Stop) => Ok(Stopping),
            (Stopping, Trigger::StopCompleted) => Ok(Stopped),
            (state, trigger) => Err(Error::InvalidTransition { state, trigger }),
        }
    }

    /// Check whether a trigger is accepted without applying it
    pub fn accepts(self, trigger: Trigger) -> bool {
        self.apply(trigger).is_ok()
    }

    /// Tag used to subscribe to transitions entering this state
    pub fn tag(&self) -> String {
        format!("->{}", self.as_str())
    }

    /// Parse a "->STATE" tag
    pub fn from_tag(tag: &str) -> Result<LifecycleState> {
        tag.trim()
            .strip_prefix("->")
            .ok_or_else(|| Error::InvalidTag(tag.to_string()))?
            .parse()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidTag(s.to_string()))
    }
}

/// Outcome of a start attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartOutcome {
    Succeeded,
    Failed,
}

impl StartOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StartOutcome::Succeeded)
    }
}

impl From<bool> for StartOutcome {
    fn from(success: bool) -> Self {
        if success {
            StartOutcome::Succeeded
        } else {
            StartOutcome::Failed
        }
    }
}

/// Lifecycle trigger
///
/// Success and failure of a start attempt share one trigger so the two
/// outcomes cannot both be fired for the same attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    Start,
    StartFinished(StartOutcome),
    Stop,
    StopCompleted,
}

impl From<StartOutcome> for Trigger {
    fn from(outcome: StartOutcome) -> Self {
        Trigger::StartFinished(outcome)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Start => f.write_str("Start"),
            Trigger::StartFinished(StartOutcome::Succeeded) => f.write_str("StartSucceeded"),
            Trigger::StartFinished(StartOutcome::Failed) => f.write_str("StartFailed"),
            Trigger::Stop => f.write_str("Stop"),
            Trigger::StopCompleted => f.write_str("StopCompleted"),
        }
    }
}

/// A transition that was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: LifecycleState,
    pub trigger: Trigger,
    pub to: LifecycleState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.from, self.trigger, self.to)
    }
}

/// Holder of the single authoritative lifecycle state
#[derive(Debug, Default)]
pub struct LifecycleMachine {
    state: LifecycleState,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Apply a trigger; on error the state is unchanged
    pub fn fire(&mut self, trigger: Trigger) -> Result<Transition> {
        let from = self.state;
        let to = from.apply(trigger)?;
        self.state = to;
        Ok(Transition { from, trigger, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIGGERS: [Trigger; 5] = [
        Trigger::Start,
        Trigger::StartFinished(StartOutcome::Succeeded),
        Trigger::StartFinished(StartOutcome::Failed),
        Trigger::Stop,
        Trigger::StopCompleted,
    ];

    #[test]
    fn test_initial_state_is_stopped() {
        assert_eq!(LifecycleMachine::new().state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_full_cycle() {
        let mut machine = LifecycleMachine::new();

        let t = machine.fire(Trigger::Start).unwrap();
        assert_eq!(t.from, LifecycleState::Stopped);
        assert_eq!(t.to, LifecycleState::Starting);

        machine.fire(Trigger::StartFinished(StartOutcome::Succeeded)).unwrap();
        assert_eq!(machine.state(), LifecycleState::Listening);

        machine.fire(Trigger::Stop).unwrap();
        assert_eq!(machine.state(), LifecycleState::Stopping);

        machine.fire(Trigger::StopCompleted).unwrap();
        assert_eq!(machine.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_failed_start_returns_to_stopped() {
        let mut machine = LifecycleMachine::new();
        machine.fire(Trigger::Start).unwrap();
        machine.fire(StartOutcome::from(false).into()).unwrap();
        assert_eq!(machine.state(), LifecycleState::Stopped);

        // a fresh start is allowed without any reset
        assert!(machine.fire(Trigger::Start).is_ok());
    }

    #[test]
    fn test_table_is_exhaustive() {
        let mut accepted = 0;
        for state in LifecycleState::ALL {
            for trigger in TRIGGERS {
                match state.apply(trigger) {
                    Ok(_) => accepted += 1,
                    Err(e) => assert_eq!(e, Error::InvalidTransition { state, trigger }),
                }
            }
        }
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_invalid_trigger_leaves_state() {
        let mut machine = LifecycleMachine::new();
        let err = machine.fire(Trigger::Stop).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                state: LifecycleState::Stopped,
                trigger: Trigger::Stop,
            }
        );
        assert_eq!(machine.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_tags() {
        assert_eq!(LifecycleState::Listening.tag(), "->LISTENING");
        assert_eq!(
            LifecycleState::from_tag("->STOPPING").unwrap(),
            LifecycleState::Stopping
        );
        assert!(LifecycleState::from_tag("LISTENING").is_err());
        assert!(LifecycleState::from_tag("->RUNNING").is_err());
    }
}
