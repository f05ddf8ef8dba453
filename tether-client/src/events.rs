//! Typed publish/subscribe registry for transport events
//!
//! The UI and any other consumer learn about the transport exclusively
//! through events: state changes, payloads, liveness results, reconnect
//! scheduling and terminal failures. Event kinds form a closed enum, so a
//! misspelled event name is a compile error rather than a silent no-op.
//!
//! Handlers run synchronously on the transport's driver task, in
//! registration order, and must not block. A handler that panics is
//! isolated: the panic is caught, logged as [`Error::Handler`], counted, and
//! the remaining handlers still run.
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{EventBus, EventKind, TransportEvent};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(EventKind::Connected, |_event| {
//!     println!("online");
//! });
//!
//! bus.publish(&TransportEvent::Connected);
//! assert!(subscription.unsubscribe());
//! ```

use crate::connection_state::{ConnectionState, FailureCause};
use crate::network::Reachability;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tether_core::{Envelope, Error};

/// Everything the transport reports
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection state changed
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A socket opened; heartbeats start now
    Connected,
    /// A payload was accepted by the socket
    MessageSent(Envelope),
    /// A payload arrived from the server
    MessageReceived(Envelope),
    /// The outbound queue was flushed after connecting
    Drained { count: usize },
    /// A heartbeat round-trip completed
    LivenessConfirmed { round_trip: Duration },
    /// A heartbeat went unanswered; the connection is being torn down
    LivenessTimeout { waited: Duration },
    /// A socket-level failure; recovery is automatic
    TransportError { message: String },
    /// A retry is scheduled
    Reconnecting {
        attempt: u32,
        delay: Duration,
        cause: FailureCause,
    },
    /// The network signal changed
    NetworkChanged(Reachability),
    /// No credentials at dial time; call `connect()` once they are restored
    AuthenticationMissing,
    /// The reconnect loop gave up; call `reset()` or build a new client
    MaxAttemptsExceeded { attempts: u32 },
    /// The transport stopped; `discarded` queued messages were dropped
    Closed { discarded: usize },
}

impl TransportEvent {
    /// The kind used for subscription matching
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::StateChanged { .. } => EventKind::StateChanged,
            TransportEvent::Connected => EventKind::Connected,
            TransportEvent::MessageSent(_) => EventKind::MessageSent,
            TransportEvent::MessageReceived(_) => EventKind::MessageReceived,
            TransportEvent::Drained { .. } => EventKind::Drained,
            TransportEvent::LivenessConfirmed { .. } => EventKind::LivenessConfirmed,
            TransportEvent::LivenessTimeout { .. } => EventKind::LivenessTimeout,
            TransportEvent::TransportError { .. } => EventKind::TransportError,
            TransportEvent::Reconnecting { .. } => EventKind::Reconnecting,
            TransportEvent::NetworkChanged(_) => EventKind::NetworkChanged,
            TransportEvent::AuthenticationMissing => EventKind::AuthenticationMissing,
            TransportEvent::MaxAttemptsExceeded { .. } => EventKind::MaxAttemptsExceeded,
            TransportEvent::Closed { .. } => EventKind::Closed,
        }
    }
}

/// Discriminant of [`TransportEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    Connected,
    MessageSent,
    MessageReceived,
    Drained,
    LivenessConfirmed,
    LivenessTimeout,
    TransportError,
    Reconnecting,
    NetworkChanged,
    AuthenticationMissing,
    MaxAttemptsExceeded,
    Closed,
}

type HandlerFn = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` matches every kind
    kind: Option<EventKind>,
    handler: HandlerFn,
    /// Cleared on removal so an in-flight publish skips it
    active: Arc<AtomicBool>,
}

struct Registry {
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl Registry {
    fn handlers(&self) -> MutexGuard<'_, Vec<Registration>> {
        // Handlers never run under the lock, so poisoning can only come from
        // a panic inside this module; the list itself is still consistent.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers();
        match handlers.iter().position(|r| r.id == id) {
            Some(index) => {
                let removed = handlers.remove(index);
                removed.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

/// Handle returned by `subscribe`; call [`unsubscribe`](Self::unsubscribe) to stop receiving
///
/// Dropping it leaves the handler registered.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Registration id, unique per bus
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler; false if it was already gone
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Publish/subscribe registry shared by a client and its driver
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Call `handler` for every event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Call `handler` for every event
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: HandlerFn) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers().push(Registration {
            id,
            kind,
            handler,
            active: Arc::new(AtomicBool::new(true)),
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every matching handler, in registration order
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, event: &TransportEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(u64, HandlerFn, Arc<AtomicBool>)> = self
            .registry
            .handlers()
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == kind))
            .map(|r| (r.id, Arc::clone(&r.handler), Arc::clone(&r.active)))
            .collect();
        // The lock is released here so handlers may (un)subscribe.

        let mut delivered = 0;
        for (id, handler, active) in targets {
            // Unsubscribed by an earlier handler during this publish.
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.registry.failures.fetch_add(1, Ordering::Relaxed);
                    let error = Error::Handler(panic_message(payload.as_ref()));
                    tracing::error!(
                        subscription = id,
                        event_kind = ?kind,
                        error = %error,
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Handlers currently registered for `kind`, wildcards included
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .handlers()
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == kind))
            .count()
    }

    /// Handler panics caught since the bus was created
    pub fn failure_count(&self) -> u64 {
        self.registry.failures.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&TransportEvent) + Send + Sync>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| {
            let log = Arc::clone(&log_clone);
            let name = name.to_string();
            Box::new(move |_: &TransportEvent| log.lock().unwrap().push(name.clone()))
                as Box<dyn Fn(&TransportEvent) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _a = bus.subscribe(EventKind::Connected, make("a"));
        let _all = bus.subscribe_all(make("all"));
        let _b = bus.subscribe(EventKind::Connected, make("b"));
        let _other = bus.subscribe(EventKind::Closed, make("other"));

        assert_eq!(bus.publish(&TransportEvent::Connected), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "all", "b"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let sub = bus.subscribe(EventKind::Connected, make("a"));
        assert_eq!(bus.handler_count(EventKind::Connected), 1);

        let id = sub.id();
        assert!(id > 0);
        assert!(sub.unsubscribe());
        assert_eq!(bus.handler_count(EventKind::Connected), 0);

        bus.publish(&TransportEvent::Connected);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_handler_isolated() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _first = bus.subscribe(EventKind::Connected, make("first"));
        let _bad = bus.subscribe(EventKind::Connected, |_| panic!("handler bug"));
        let _last = bus.subscribe(EventKind::Connected, make("last"));

        assert_eq!(bus.publish(&TransportEvent::Connected), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "last"]);
        assert_eq!(bus.failure_count(), 1);

        // The bus keeps working afterwards.
        assert_eq!(bus.publish(&TransportEvent::Connected), 2);
        assert_eq!(bus.failure_count(), 2);
    }

    #[test]
    fn test_reentrant_subscribe_from_handler() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();

        let _sub = bus.subscribe(EventKind::Connected, move |_| {
            let _ = inner_bus.subscribe(EventKind::Closed, |_| {});
        });

        bus.publish(&TransportEvent::Connected);
        assert_eq!(bus.handler_count(EventKind::Closed), 1);
    }

    #[test]
    fn test_unsubscribe_during_publish_skips_handler() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let later: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));
        let later_clone = Arc::clone(&later);
        let _first = bus.subscribe(EventKind::Connected, move |_| {
            if let Some(sub) = later_clone.lock().unwrap().take() {
                assert!(sub.unsubscribe());
            }
        });
        *later.lock().unwrap() = Some(bus.subscribe(EventKind::Connected, make("b")));

        assert_eq!(bus.publish(&TransportEvent::Connected), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.handler_count(EventKind::Connected), 1);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Connected, |_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_event_kinds() {
        let event = TransportEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
            cause: FailureCause::NetworkDown,
        };
        assert_eq!(event.kind(), EventKind::Reconnecting);
        assert_eq!(
            TransportEvent::Closed { discarded: 0 }.kind(),
            EventKind::Closed
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        let result = panic::catch_unwind(|| panic!("static message"));
        assert_eq!(panic_message(result.unwrap_err().as_ref()), "static message");

        let result = panic::catch_unwind(|| panic!("formatted {}", 42));
        assert_eq!(panic_message(result.unwrap_err().as_ref()), "formatted 42");
    }
}
