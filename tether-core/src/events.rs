//! Named, synchronous event dispatch
//!
//! Components that announce things (the channel announcing `connect`, the
//! correlator announcing inbound `request`s) hold an [`Emitter`] rather than
//! inheriting from one. Listeners register by event name and are invoked
//! synchronously, in registration order, on whatever task emits.
//!
//! Listeners run inline on the channel's driver task, so they should hand
//! long work off (spawn, send on a channel) instead of doing it in place.
//!
//! ```rust
//! use tether_core::events::{Emitter, TransportEvent};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let emitter: Emitter<TransportEvent> = Emitter::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let id = emitter.on("connect", move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! emitter.emit(&TransportEvent::Connect);
//! emitter.off(id);
//! emitter.emit(&TransportEvent::Connect);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::error::Error;
use crate::types::InboundRequest;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An event that can be dispatched by name
pub trait Event {
    /// Name listeners subscribe under
    fn name(&self) -> &'static str;
}

/// Listener callback type
pub type ListenerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Emitter::on`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, String, ListenerFn<E>)>,
}

/// Registry of listeners keyed by event name
///
/// Cloning shares the registry.
pub struct Emitter<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> Emitter<E> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for events named `name`
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, name.into(), Arc::new(listener)));
        id
    }

    /// Remove a listener; false if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(lid, _, _)| *lid != id);
        registry.listeners.len() != before
    }

    /// Dispatch to every listener currently registered for the event's name
    ///
    /// The listener list is snapshotted first, so listeners may register or
    /// unregister from inside a callback. A panicking listener is logged and
    /// skipped; the remaining listeners still run.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &E) -> usize {
        let name = event.name();
        let targets: Vec<ListenerFn<E>> = self
            .lock()
            .listeners
            .iter()
            .filter(|(_, n, _)| n == name)
            .map(|(_, _, f)| Arc::clone(f))
            .collect();

        for listener in &targets {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(event = name, "Event listener panicked");
            }
        }
        targets.len()
    }

    /// Number of listeners registered under `name`
    pub fn listener_count(&self, name: &str) -> usize {
        self.lock().listeners.iter().filter(|(_, n, _)| n == name).count()
    }
}

impl<E: Event> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a client announces to its observers
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel reached Open
    Connect,
    /// The channel left Open involuntarily
    Disconnect,
    /// A physical-layer error; does not by itself change lifecycle state
    Error(Error),
    /// The channel reached its terminal Closed state
    Close,
    /// The peer sent a request or notification
    Request(InboundRequest),
}

impl TransportEvent {
    /// Name of [`TransportEvent::Connect`]
    pub const CONNECT: &'static str = "connect";
    /// Name of [`TransportEvent::Disconnect`]
    pub const DISCONNECT: &'static str = "disconnect";
    /// Name of [`TransportEvent::Error`]
    pub const ERROR: &'static str = "error";
    /// Name of [`TransportEvent::Close`]
    pub const CLOSE: &'static str = "close";
    /// Name of [`TransportEvent::Request`]
    pub const REQUEST: &'static str = "request";
}

impl Event for TransportEvent {
    fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connect => Self::CONNECT,
            TransportEvent::Disconnect => Self::DISCONNECT,
            TransportEvent::Error(_) => Self::ERROR,
            TransportEvent::Close => Self::CLOSE,
            TransportEvent::Request(_) => Self::REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Id;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_only_to_matching_name() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&connects);
        emitter.on(TransportEvent::CONNECT, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(emitter.emit(&TransportEvent::Disconnect), 0);
        assert_eq!(emitter.emit(&TransportEvent::Connect), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = Arc::clone(&order);
            emitter.on("close", move |_| order.lock().unwrap().push(tag));
        }

        emitter.emit(&TransportEvent::Close);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let id = emitter.on("connect", |_| {});
        assert_eq!(emitter.listener_count("connect"), 1);

        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.listener_count("connect"), 0);
    }

    #[test]
    fn test_listener_receives_payload() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        emitter.on("request", move |event| {
            if let TransportEvent::Request(req) = event {
                *s.lock().unwrap() = Some(req.method.clone());
            }
        });

        emitter.emit(&TransportEvent::Request(InboundRequest {
            method: "greet".to_string(),
            id: Id::Number(3),
            params: None,
        }));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("greet"));
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let (em, sl, ca) = (emitter.clone(), Arc::clone(&slot), Arc::clone(&calls));
        let id = emitter.on("connect", move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *sl.lock().unwrap() {
                em.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        emitter.emit(&TransportEvent::Connect);
        emitter.emit(&TransportEvent::Connect);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let emitter: Emitter<TransportEvent> = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        emitter.on("disconnect", |_| panic!("listener bug"));
        let c = Arc::clone(&calls);
        emitter.on("disconnect", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(emitter.emit(&TransportEvent::Disconnect), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(TransportEvent::Connect.name(), "connect");
        assert_eq!(TransportEvent::Disconnect.name(), "disconnect");
        assert_eq!(TransportEvent::Error(Error::Timeout).name(), "error");
        assert_eq!(TransportEvent::Close.name(), "close");
    }
}
