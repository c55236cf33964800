//! Server Core Tests
//!
//! Drives ServerCore through an in-memory adapter that follows the adapter
//! contract (registry, start/stop handlers, idempotent disconnects):
//! - Start/stop cycles
//! - Failed starts
//! - Connection and message event ordering
//! - Teardown completeness
//! - Routing misses

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tether_core::{
    ConnectionId, Error, LifecycleState, MessageEnvelope, ServerCore, StartOutcome, Trigger,
};
use tokio::time::timeout;

// ============================================================================
// In-memory adapter
// ============================================================================

#[derive(Default)]
struct Registry {
    connections: Mutex<HashMap<ConnectionId, Arc<Mutex<Vec<Value>>>>>,
}

struct MemoryAdapter {
    core: Arc<ServerCore>,
    registry: Arc<Registry>,
    fail_next_start: Arc<Mutex<bool>>,
}

impl MemoryAdapter {
    fn new() -> Self {
        let core = Arc::new(ServerCore::new("memory"));
        let registry = Arc::new(Registry::default());
        let fail_next_start = Arc::new(Mutex::new(false));

        let weak: Weak<ServerCore> = Arc::downgrade(&core);
        let fail = Arc::clone(&fail_next_start);
        core.state_changed().on(LifecycleState::Starting, move |_| {
            let Some(core) = weak.upgrade() else { return };
            let failed = std::mem::take(&mut *fail.lock());
            // report from another task, the way a real bind completes
            tokio::spawn(async move {
                core.report_started(!failed).unwrap();
            });
        });

        let weak = Arc::downgrade(&core);
        let reg = Arc::clone(&registry);
        core.state_changed().on(LifecycleState::Stopping, move |_| {
            let Some(core) = weak.upgrade() else { return };
            let drained: Vec<ConnectionId> = reg.connections.lock().drain().map(|(id, _)| id).collect();
            for id in drained {
                core.connection_dropped().push(id);
            }
            core.report_stopped().unwrap();
        });

        let reg = Arc::clone(&registry);
        core.install_sink(Arc::new(move |envelope: MessageEnvelope| {
            match reg.connections.lock().get(&envelope.connection_id) {
                Some(inbox) => {
                    inbox.lock().push(envelope.payload);
                    true
                }
                None => false,
            }
        }));

        Self {
            core,
            registry,
            fail_next_start,
        }
    }

    fn accept(&self, id: &str) -> Arc<Mutex<Vec<Value>>> {
        let inbox = Arc::new(Mutex::new(Vec::new()));
        self.registry
            .connections
            .lock()
            .insert(ConnectionId::from(id), Arc::clone(&inbox));
        self.core.connection_established().push(ConnectionId::from(id));
        inbox
    }

    fn disconnect(&self, id: &str) {
        let id = ConnectionId::from(id);
        if self.registry.connections.lock().remove(&id).is_some() {
            self.core.connection_dropped().push(id);
        }
    }

    fn receive(&self, id: &str, payload: Value) {
        let id = ConnectionId::from(id);
        if self.registry.connections.lock().contains_key(&id) {
            self.core
                .message_received()
                .push(MessageEnvelope::new(id, payload));
        }
    }

    fn registry_len(&self) -> usize {
        self.registry.connections.lock().len()
    }
}

fn record<T: Clone + Send + 'static>(
    bus: &tether_core::EventBus<T>,
) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(move |e: &T| sink.lock().push(e.clone()));
    seen
}

fn record_states(core: &ServerCore) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    core.state_changed()
        .on_any(move |t| sink.lock().push(t.to.tag()));
    seen
}

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_start_then_stop() {
    let adapter = MemoryAdapter::new();
    let states = record_states(&adapter.core);

    let outcome = timeout(WAIT, adapter.core.start_and_wait())
        .await
        .expect("start timed out")
        .unwrap();
    assert_eq!(outcome, StartOutcome::Succeeded);

    timeout(WAIT, adapter.core.stop_and_wait())
        .await
        .expect("stop timed out")
        .unwrap();

    assert_eq!(
        *states.lock(),
        vec!["->STARTING", "->LISTENING", "->STOPPING", "->STOPPED"]
    );
}

#[tokio::test]
async fn test_repeated_cycles_leave_registry_empty() {
    let adapter = MemoryAdapter::new();

    for cycle in 0..3 {
        let outcome = timeout(WAIT, adapter.core.start_and_wait())
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_success());

        for n in 0..=cycle {
            adapter.accept(&format!("c{}-{}", cycle, n));
        }
        assert_eq!(adapter.registry_len(), cycle + 1);

        timeout(WAIT, adapter.core.stop_and_wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adapter.registry_len(), 0);
    }
}

#[tokio::test]
async fn test_failed_start_returns_to_stopped() {
    let adapter = MemoryAdapter::new();
    *adapter.fail_next_start.lock() = true;

    let outcome = adapter.core.start_and_wait().await.unwrap();
    assert_eq!(outcome, StartOutcome::Failed);

    // a fresh start works without any reset
    let outcome = adapter.core.start_and_wait().await.unwrap();
    assert_eq!(outcome, StartOutcome::Succeeded);
}

#[tokio::test]
async fn test_stop_while_stopped_is_rejected() {
    let adapter = MemoryAdapter::new();
    let states = record_states(&adapter.core);

    assert_eq!(
        adapter.core.stop().unwrap_err(),
        Error::InvalidTransition {
            state: LifecycleState::Stopped,
            trigger: Trigger::Stop,
        }
    );
    assert!(adapter.core.stop_and_wait().await.is_err());
    assert!(states.lock().is_empty());

    // still STOPPED, so start is accepted
    assert!(adapter.core.start().is_ok());
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let core = ServerCore::new("no-adapter");
    core.start().unwrap();
    assert!(matches!(
        core.start(),
        Err(Error::InvalidTransition {
            state: LifecycleState::Starting,
            ..
        })
    ));
    assert!(core.start_and_wait().await.is_err());
    // the failed wait did not leave a subscription behind
    assert_eq!(core.state_changed().subscriber_count(), 1);
}

#[tokio::test]
async fn test_stop_from_listening_handler() {
    let adapter = MemoryAdapter::new();
    let weak = Arc::downgrade(&adapter.core);
    adapter
        .core
        .state_changed()
        .on(LifecycleState::Listening, move |_| {
            if let Some(core) = weak.upgrade() {
                core.stop().unwrap();
            }
        });

    let stopped = adapter.core.state_changed().wait_for(&[LifecycleState::Stopped]);
    adapter.core.start().unwrap();

    let transition = timeout(WAIT, stopped).await.unwrap().unwrap();
    assert_eq!(transition.from, LifecycleState::Stopping);
}

// ============================================================================
// Connection & Message Tests
// ============================================================================

#[tokio::test]
async fn test_connection_events_in_order() {
    let adapter = MemoryAdapter::new();
    adapter.core.start_and_wait().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);
    adapter
        .core
        .connection_established()
        .subscribe(move |id| o.lock().push(format!("established {}", id)));
    let o = Arc::clone(&order);
    adapter
        .core
        .message_received()
        .subscribe(move |env| o.lock().push(format!("message {}", env.connection_id)));
    let o = Arc::clone(&order);
    adapter
        .core
        .connection_dropped()
        .subscribe(move |id| o.lock().push(format!("dropped {}", id)));

    adapter.accept("a");
    adapter.receive("a", json!({"payload": 2}));
    adapter.disconnect("a");
    // double fire is absorbed
    adapter.disconnect("a");
    // messages for unknown connections are not published
    adapter.receive("a", json!({"payload": 3}));

    assert_eq!(
        *order.lock(),
        vec!["established a", "message a", "dropped a"]
    );
}

#[tokio::test]
async fn test_message_identifies_connection() {
    let adapter = MemoryAdapter::new();
    adapter.core.start_and_wait().await.unwrap();

    let established = record(adapter.core.connection_established());
    let messages = record(adapter.core.message_received());

    adapter.accept("client-1");
    adapter.receive("client-1", json!({"payload": 2}));

    let id = established.lock()[0].clone();
    let envelope = messages.lock()[0].clone();
    assert_eq!(envelope.connection_id, id);
    assert_eq!(envelope.payload, json!({"payload": 2}));
}

#[tokio::test]
async fn test_send_message_routes_to_connection() {
    let adapter = MemoryAdapter::new();
    adapter.core.start_and_wait().await.unwrap();

    let inbox = adapter.accept("a");
    assert!(adapter
        .core
        .send_message(MessageEnvelope::new("a", json!({"payload": 2}))));
    assert_eq!(*inbox.lock(), vec![json!({"payload": 2})]);
}

#[tokio::test]
async fn test_send_to_missing_connection() {
    let adapter = MemoryAdapter::new();
    adapter.core.start_and_wait().await.unwrap();
    let dropped = record(adapter.core.connection_dropped());
    let messages = record(adapter.core.message_received());

    assert!(!adapter
        .core
        .send_message(MessageEnvelope::new("ghost", json!({"payload": 2}))));

    assert!(dropped.lock().is_empty());
    assert!(messages.lock().is_empty());
}

#[tokio::test]
async fn test_stop_drops_every_connection() {
    let adapter = MemoryAdapter::new();
    adapter.core.start_and_wait().await.unwrap();
    let dropped = record(adapter.core.connection_dropped());

    for id in ["a", "b", "c"] {
        adapter.accept(id);
    }
    adapter.core.stop_and_wait().await.unwrap();

    let mut ids: Vec<String> = dropped.lock().iter().map(|id| id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(adapter.registry_len(), 0);
}

#[tokio::test]
async fn test_servers_do_not_share_events() {
    let first = MemoryAdapter::new();
    let second = MemoryAdapter::new();
    let seen = record(second.core.connection_established());

    first.accept("only-on-first");

    assert!(seen.lock().is_empty());
}
