//! Route event notifications.
//!
//! Listeners are told about every RREQ, RREP and RERR this node sends or
//! receives. Notification happens synchronously on the task that produced
//! the event, in registration order, so listeners must return quickly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use meshroute_core::Address;
use serde::{Deserialize, Serialize};

/// Hooks for route protocol activity. Every hook defaults to a no-op.
pub trait RoutingEventListener: Send + Sync {
    fn rreq_sent(&self, _originator: Address, _destination: Address, _hop_count: u32) {}
    fn rreq_received(&self, _originator: Address, _destination: Address, _hop_count: u32) {}
    fn rrep_sent(&self, _originator: Address, _destination: Address, _hop_count: u32) {}
    fn rrep_received(&self, _originator: Address, _destination: Address, _hop_count: u32) {}
    fn rerr_sent(&self, _originator: Address, _destination: Address) {}
    fn rerr_received(&self, _originator: Address, _destination: Address) {}
}

/// A route protocol event, as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoutingEvent {
    RreqSent {
        originator: Address,
        destination: Address,
        hop_count: u32,
    },
    RreqReceived {
        originator: Address,
        destination: Address,
        hop_count: u32,
    },
    RrepSent {
        originator: Address,
        destination: Address,
        hop_count: u32,
    },
    RrepReceived {
        originator: Address,
        destination: Address,
        hop_count: u32,
    },
    RerrSent {
        originator: Address,
        destination: Address,
    },
    RerrReceived {
        originator: Address,
        destination: Address,
    },
}

impl RoutingEvent {
    /// Call the hook on `listener` matching this event.
    pub fn dispatch(&self, listener: &dyn RoutingEventListener) {
        match *self {
            Self::RreqSent {
                originator,
                destination,
                hop_count,
            } => listener.rreq_sent(originator, destination, hop_count),
            Self::RreqReceived {
                originator,
                destination,
                hop_count,
            } => listener.rreq_received(originator, destination, hop_count),
            Self::RrepSent {
                originator,
                destination,
                hop_count,
            } => listener.rrep_sent(originator, destination, hop_count),
            Self::RrepReceived {
                originator,
                destination,
                hop_count,
            } => listener.rrep_received(originator, destination, hop_count),
            Self::RerrSent {
                originator,
                destination,
            } => listener.rerr_sent(originator, destination),
            Self::RerrReceived {
                originator,
                destination,
            } => listener.rerr_received(originator, destination),
        }
    }

    pub fn destination(&self) -> Address {
        match *self {
            Self::RreqSent { destination, .. }
            | Self::RreqReceived { destination, .. }
            | Self::RrepSent { destination, .. }
            | Self::RrepReceived { destination, .. }
            | Self::RerrSent { destination, .. }
            | Self::RerrReceived { destination, .. } => destination,
        }
    }
}

/// Handle returned by `add`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Registered listeners, kept in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RoutingEventListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn RoutingEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, listener));
        id
    }

    /// Returns `false` if no listener was registered under `id`.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. The registry lock is not held
    /// while listeners run, so a listener may add or remove listeners.
    pub fn emit(&self, event: RoutingEvent) {
        let listeners: Vec<Arc<dyn RoutingEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            event.dispatch(listener.as_ref());
        }
    }
}

/// Logs every route event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl RoutingEventListener for TracingListener {
    fn rreq_sent(&self, originator: Address, destination: Address, hop_count: u32) {
        tracing::info!(%originator, %destination, hop_count, "RREQ sent");
    }

    fn rreq_received(&self, originator: Address, destination: Address, hop_count: u32) {
        tracing::info!(%originator, %destination, hop_count, "RREQ received");
    }

    fn rrep_sent(&self, originator: Address, destination: Address, hop_count: u32) {
        tracing::info!(%originator, %destination, hop_count, "RREP sent");
    }

    fn rrep_received(&self, originator: Address, destination: Address, hop_count: u32) {
        tracing::info!(%originator, %destination, hop_count, "RREP received");
    }

    fn rerr_sent(&self, originator: Address, destination: Address) {
        tracing::info!(%originator, %destination, "RERR sent");
    }

    fn rerr_received(&self, originator: Address, destination: Address) {
        tracing::info!(%originator, %destination, "RERR received");
    }
}

/// Collects events in memory, for diagnostics and tests.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RoutingEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RoutingEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn push(&self, event: RoutingEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}

impl RoutingEventListener for EventRecorder {
    fn rreq_sent(&self, originator: Address, destination: Address, hop_count: u32) {
        self.push(RoutingEvent::RreqSent {
            originator,
            destination,
            hop_count,
        });
    }

    fn rreq_received(&self, originator: Address, destination: Address, hop_count: u32) {
        self.push(RoutingEvent::RreqReceived {
            originator,
            destination,
            hop_count,
        });
    }

    fn rrep_sent(&self, originator: Address, destination: Address, hop_count: u32) {
        self.push(RoutingEvent::RrepSent {
            originator,
            destination,
            hop_count,
        });
    }

    fn rrep_received(&self, originator: Address, destination: Address, hop_count: u32) {
        self.push(RoutingEvent::RrepReceived {
            originator,
            destination,
            hop_count,
        });
    }

    fn rerr_sent(&self, originator: Address, destination: Address) {
        self.push(RoutingEvent::RerrSent {
            originator,
            destination,
        });
    }

    fn rerr_received(&self, originator: Address, destination: Address) {
        self.push(RoutingEvent::RerrReceived {
            originator,
            destination,
        });
    }
}
