//! Callers waiting on a route discovery.

use std::sync::Mutex;

use meshroute_core::Address;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::DiscoveryError;
use crate::route_table::RouteEntry;

/// Opaque value a caller hands to `find_route` and gets back with the outcome.
pub type CorrelationToken = Uuid;

/// How a route discovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Found(RouteEntry),
    Failed {
        destination: Address,
        error: DiscoveryError,
    },
}

impl RouteOutcome {
    pub fn destination(&self) -> Address {
        match self {
            Self::Found(route) => route.destination,
            Self::Failed { destination, .. } => *destination,
        }
    }

    pub fn route(&self) -> Option<RouteEntry> {
        match self {
            Self::Found(route) => Some(*route),
            Self::Failed { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<RouteEntry, DiscoveryError> {
        match self {
            Self::Found(route) => Ok(route),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Receives the outcome of a route discovery.
///
/// Called exactly once per `find_route` that returned `Ok(false)`, on the
/// task that resolved or expired the request. Implementations must not block.
pub trait RouteEventClient: Send + Sync {
    fn route_event(&self, outcome: RouteOutcome, token: CorrelationToken);
}

/// Forwards every outcome into an unbounded channel.
pub struct ChannelClient {
    tx: mpsc::UnboundedSender<(CorrelationToken, RouteOutcome)>,
}

impl ChannelClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(CorrelationToken, RouteOutcome)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RouteEventClient for ChannelClient {
    fn route_event(&self, outcome: RouteOutcome, token: CorrelationToken) {
        if self.tx.send((token, outcome)).is_err() {
            tracing::debug!(%token, "route outcome dropped, receiver gone");
        }
    }
}

/// Delivers a single outcome through a oneshot channel.
pub struct OneshotClient {
    tx: Mutex<Option<oneshot::Sender<RouteOutcome>>>,
}

impl OneshotClient {
    pub fn new() -> (Self, oneshot::Receiver<RouteOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl RouteEventClient for OneshotClient {
    fn route_event(&self, outcome: RouteOutcome, token: CorrelationToken) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(%token, "oneshot client notified twice"),
        }
    }
}
