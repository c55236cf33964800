//! Connection registry
//!
//! Maps connection identifiers to live handles. Owned by the adapter; the core
//! only reaches it through [`MessageSink`].
//!
//! The registry is gated: [`ConnectionRegistry::insert`] is refused between
//! [`ConnectionRegistry::close_all`] and the next [`ConnectionRegistry::open`],
//! so a handshake that completes during teardown cannot leak a connection past
//! STOPPED.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tether_core::{ConnectionId, MessageEnvelope, MessageSink};
use tracing::{debug, warn};

use crate::traits::ConnectionHandle;

pub struct ConnectionRegistry<H> {
    connections: DashMap<ConnectionId, Arc<H>>,
    accepting: RwLock<bool>,
}

impl<H: ConnectionHandle> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            accepting: RwLock::new(false),
        }
    }

    /// Start accepting registrations
    pub fn open(&self) {
        *self.accepting.write() = true;
    }

    pub fn is_accepting(&self) -> bool {
        *self.accepting.read()
    }

    /// Register an accepted connection.
    ///
    /// Returns false when the registry is closed or the id is already taken.
    pub fn insert(&self, handle: Arc<H>) -> bool {
        self.insert_with(handle, |_| {})
    }

    /// Register a connection and run `on_inserted` before teardown can
    /// remove it, so announcements made there precede any removal.
    pub fn insert_with<F>(&self, handle: Arc<H>, on_inserted: F) -> bool
    where
        F: FnOnce(&ConnectionId),
    {
        let accepting = self.accepting.read();
        if !*accepting {
            return false;
        }
        let id = handle.id().clone();
        match self.connections.entry(id.clone()) {
            Entry::Occupied(entry) => {
                warn!("connection id {} is already registered", entry.key());
                return false;
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
            }
        }
        on_inserted(&id);
        drop(accepting);
        true
    }

    /// Unregister a connection. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<H>> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<H>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop accepting and remove every entry, returning the removed handles
    /// so the caller can close them.
    pub fn close_all(&self) -> Vec<Arc<H>> {
        let mut accepting = self.accepting.write();
        *accepting = false;

        let mut drained = Vec::with_capacity(self.connections.len());
        for id in self.ids() {
            if let Some(handle) = self.remove(&id) {
                drained.push(handle);
            }
        }
        debug!("registry drained {} connection(s)", drained.len());
        drained
    }
}

impl<H: ConnectionHandle> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ConnectionHandle> MessageSink for ConnectionRegistry<H> {
    fn send_message(&self, envelope: MessageEnvelope) -> bool {
        let Some(handle) = self.get(&envelope.connection_id) else {
            debug!("no connection {} to send to", envelope.connection_id);
            return false;
        };
        match handle.send(&envelope.payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("send to {} failed: {}", envelope.connection_id, e);
                false
            }
        }
    }
}

impl<H> std::fmt::Debug for ConnectionRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("accepting", &*self.accepting.read())
            .finish()
    }
}
