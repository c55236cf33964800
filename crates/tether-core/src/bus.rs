//! Push-based, multi-subscriber event buses
//!
//! Buses deliver through a [`Dispatcher`], a FIFO queue with a single drainer.
//! Buses that share a dispatcher are delivered in one total order: the order in
//! which events were pushed across all of them. A handler that pushes into a
//! bus does not recurse: the new event is queued and delivered after the
//! current one has reached every subscriber. The same holds across threads,
//! only one caller drains at a time and the others return as soon as their
//! event is queued.
//!
//! A subscriber only sees events pushed after it subscribed; there is no replay.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::{Mutex, RwLock};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Job = Box<dyn FnOnce() + Send>;

/// Handle returned by every subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct DispatchQueue {
    pending: VecDeque<Job>,
    draining: bool,
}

/// Delivery queue shared by the buses of one server
pub struct Dispatcher {
    queue: Mutex<DispatchQueue>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(DispatchQueue {
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Queue a delivery. Returns true when the caller became the drainer and
    /// must call [`Dispatcher::drain`].
    fn enqueue(&self, job: Job) -> bool {
        let mut queue = self.queue.lock();
        queue.pending.push_back(job);
        if queue.draining {
            false
        } else {
            queue.draining = true;
            true
        }
    }

    fn drain(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                match queue.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            job();
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

// =============================================================================
// EventBus
// =============================================================================

struct Subscriber<T> {
    id: SubscriptionId,
    /// First sequence number this subscriber may see
    since: u64,
    filter: Option<Filter<T>>,
    once: bool,
    handler: Handler<T>,
}

impl<T> Subscriber<T> {
    fn wants(&self, seq: u64, event: &T) -> bool {
        seq >= self.since && self.filter.as_ref().map_or(true, |f| f(event))
    }
}

struct Subscribers<T> {
    next_seq: Mutex<u64>,
    list: RwLock<Vec<Subscriber<T>>>,
}

impl<T> Subscribers<T> {
    fn dispatch(&self, seq: u64, event: &T) {
        let targets: Vec<(SubscriptionId, bool, Handler<T>)> = self
            .list
            .read()
            .iter()
            .filter(|s| s.wants(seq, event))
            .map(|s| (s.id, s.once, Arc::clone(&s.handler)))
            .collect();

        if targets.iter().any(|(_, once, _)| *once) {
            self.list.write().retain(|s| !(s.once && s.wants(seq, event)));
        }

        for (id, once, handler) in targets {
            // an earlier handler may have unsubscribed this one
            if !once && !self.contains(id) {
                continue;
            }
            handler(event);
        }
    }

    fn contains(&self, id: SubscriptionId) -> bool {
        self.list.read().iter().any(|s| s.id == id)
    }
}

/// Event bus
pub struct EventBus<T> {
    name: &'static str,
    dispatcher: Arc<Dispatcher>,
    subscribers: Arc<Subscribers<T>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> EventBus<T> {
    /// Bus with its own dispatcher
    pub fn new(name: &'static str) -> Self {
        Self::with_dispatcher(name, Arc::new(Dispatcher::new()))
    }

    /// Bus delivering through a shared dispatcher
    pub fn with_dispatcher(name: &'static str, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            name,
            dispatcher,
            subscribers: Arc::new(Subscribers {
                next_seq: Mutex::new(0),
                list: RwLock::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Attach a handler called for every event pushed from now on
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach(None, false, Arc::new(handler))
    }

    /// Attach a handler called only for events accepted by `filter`
    pub fn subscribe_filtered<P, F>(&self, filter: P, handler: F) -> SubscriptionId
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach(Some(Arc::new(filter)), false, Arc::new(handler))
    }

    /// Receive the next event accepted by `filter`, then detach
    pub fn next_matching<P>(&self, filter: P) -> (SubscriptionId, oneshot::Receiver<T>)
    where
        T: Clone,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.attach(
            Some(Arc::new(filter)),
            true,
            Arc::new(move |event: &T| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event.clone());
                }
            }),
        );
        (id, rx)
    }

    /// Detach a handler, returns false if it was not attached
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.subscribers.list.write();
        let before = list.len();
        list.retain(|s| s.id != id);
        list.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.list.read().len()
    }

    /// Push an event to every current subscriber
    pub fn push(&self, event: T) {
        if self.enqueue(event) {
            self.drain();
        }
    }

    fn attach(&self, filter: Option<Filter<T>>, once: bool, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // Holding the sequence lock orders the subscription against concurrent pushes.
        let next_seq = self.subscribers.next_seq.lock();
        self.subscribers.list.write().push(Subscriber {
            id,
            since: *next_seq,
            filter,
            once,
            handler,
        });
        id
    }

    /// Queue an event on the dispatcher. Returns true when the caller became
    /// the drainer and must call [`EventBus::drain`].
    pub(crate) fn enqueue(&self, event: T) -> bool {
        let seq = {
            let mut next_seq = self.subscribers.next_seq.lock();
            let seq = *next_seq;
            *next_seq += 1;
            seq
        };
        let subscribers = Arc::clone(&self.subscribers);
        self.dispatcher
            .enqueue(Box::new(move || subscribers.dispatch(seq, &event)))
    }

    pub(crate) fn drain(&self) {
        self.dispatcher.drain();
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.list.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: &T| sink.lock().push(e.clone()))
    }

    #[test]
    fn test_fifo_delivery() {
        let bus = EventBus::new("test");
        let (seen, handler) = recorder::<u32>();
        bus.subscribe(handler);

        for i in 0..5 {
            bus.push(i);
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_registration_order() {
        let bus = EventBus::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.subscribe(move |_: &()| order.lock().push(tag));
        }

        bus.push(());

        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_no_replay() {
        let bus = EventBus::new("test");
        bus.push(1u32);

        let (seen, handler) = recorder::<u32>();
        bus.subscribe(handler);
        bus.push(2);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new("test");
        let (seen, handler) = recorder::<u32>();
        let id = bus.subscribe(handler);

        bus.push(1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.push(2);

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_filtered() {
        let bus = EventBus::new("test");
        let (seen, handler) = recorder::<u32>();
        bus.subscribe_filtered(|n: &u32| n % 2 == 0, handler);

        for i in 0..6 {
            bus.push(i);
        }

        assert_eq!(*seen.lock(), vec![0, 2, 4]);
    }

    #[test]
    fn test_reentrant_push_is_queued() {
        let bus = Arc::new(EventBus::new("test"));
        let (seen, record) = recorder::<u32>();

        let inner = Arc::clone(&bus);
        bus.subscribe(move |n: &u32| {
            if *n == 1 {
                inner.push(2);
            }
        });
        bus.subscribe(record);

        bus.push(1);

        // the second subscriber sees 1 before 2
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_shared_dispatcher_orders_across_buses() {
        let dispatcher = Arc::new(Dispatcher::new());
        let first = Arc::new(EventBus::with_dispatcher("first", Arc::clone(&dispatcher)));
        let second = Arc::new(EventBus::with_dispatcher("second", dispatcher));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        first.subscribe(move |n: &u32| {
            if *n == 1 {
                b.push(10);
                a.push(2);
            }
        });
        let log = Arc::clone(&order);
        first.subscribe(move |n: &u32| log.lock().push(*n));
        let log = Arc::clone(&order);
        second.subscribe(move |n: &u32| log.lock().push(*n));

        first.push(1);

        // push order across both buses, not per-bus order
        assert_eq!(*order.lock(), vec![1, 10, 2]);
    }

    #[test]
    fn test_next_matching_fires_once() {
        let bus = EventBus::new("test");
        let (_, mut rx) = bus.next_matching(|n: &u32| *n > 1);

        bus.push(1);
        assert!(matches!(rx.try_recv(), Ok(None)));

        bus.push(5);
        bus.push(6);
        assert_eq!(rx.try_recv().unwrap(), Some(5));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
