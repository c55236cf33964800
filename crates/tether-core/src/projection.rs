//! Lifecycle transitions as a subscribable event stream
//!
//! [`StateChanged`] owns the lifecycle state machine. Every applied trigger
//! produces one [`Transition`] event, tagged by its destination state, which is
//! the only way callers observe lifecycle changes.

use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::bus::{Dispatcher, EventBus, SubscriptionId};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleMachine, LifecycleState, Transition, Trigger};

pub struct StateChanged {
    machine: Mutex<LifecycleMachine>,
    events: EventBus<Transition>,
}

impl StateChanged {
    pub fn new() -> Self {
        Self::with_dispatcher(Arc::new(Dispatcher::new()))
    }

    /// Stream delivering through a dispatcher shared with other buses
    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            machine: Mutex::new(LifecycleMachine::new()),
            events: EventBus::with_dispatcher("stateChanged", dispatcher),
        }
    }

    /// Apply a trigger and publish the resulting transition.
    pub(crate) fn fire(&self, trigger: Trigger) -> Result<Transition> {
        let (transition, drain) = {
            let mut machine = self.machine.lock();
            let transition = machine.fire(trigger)?;
            // queued under the state lock so event order matches transition order
            let drain = self.events.enqueue(transition);
            (transition, drain)
        };
        if drain {
            self.events.drain();
        }
        Ok(transition)
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.machine.lock().state()
    }

    /// Call `handler` for every future transition into `state`
    pub fn on<F>(&self, state: LifecycleState, handler: F) -> SubscriptionId
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.events
            .subscribe_filtered(move |t: &Transition| t.to == state, handler)
    }

    /// Same as [`StateChanged::on`] with a textual tag such as `"->LISTENING"`
    pub fn on_tag<F>(&self, tag: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        let state = LifecycleState::from_tag(tag)?;
        Ok(self.on(state, handler))
    }

    /// Call `handler` for every future transition
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Resolve on the next transition into any of `states`.
    ///
    /// The subscription is placed when this is called, not when the future is
    /// first polled.
    pub fn wait_for(
        &self,
        states: &[LifecycleState],
    ) -> impl Future<Output = Result<Transition>> + Send + 'static {
        let (_, rx) = self.next_into(states);
        async move { rx.await.map_err(|_| Error::SubscriptionClosed) }
    }

    pub(crate) fn next_into(
        &self,
        states: &[LifecycleState],
    ) -> (SubscriptionId, oneshot::Receiver<Transition>) {
        let states = states.to_vec();
        self.events
            .next_matching(move |t: &Transition| states.contains(&t.to))
    }
}

impl Default for StateChanged {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChanged")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
