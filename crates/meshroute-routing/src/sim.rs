//! In-memory radio medium.
//!
//! Nodes attach to a [`SimulatedMedium`] and get a [`SimulatedRadio`] (their
//! [`LinkLayer`]) plus a receiver for inbound frames. Frames travel only
//! between linked neighbors; unicasts to anyone else fail with `NoAck`, the
//! way an unacknowledged radio send would.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use meshroute_core::{Address, AodvMessage, RouteErrorMessage, RouteReply, RouteRequest};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;
use crate::link::LinkLayer;
use crate::manager::RoutingManager;

/// A frame delivered to an attached node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// The neighbor that transmitted the frame.
    pub last_hop: Address,
    pub payload: Bytes,
}

struct Station {
    inbox: mpsc::UnboundedSender<InboundFrame>,
    radio_on: Arc<AtomicBool>,
}

/// A shared radio channel connecting attached nodes.
#[derive(Default)]
pub struct SimulatedMedium {
    stations: DashMap<Address, Station>,
    neighbors: DashMap<Address, BTreeSet<Address>>,
    frames: AtomicU64,
    /// Per-frame loss probability, stored as `f64` bits.
    loss: AtomicU64,
}

impl SimulatedMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node. Re-attaching an address replaces its inbox.
    pub fn attach(
        self: &Arc<Self>,
        address: Address,
    ) -> (Arc<SimulatedRadio>, mpsc::UnboundedReceiver<InboundFrame>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let radio_on = Arc::new(AtomicBool::new(true));
        self.stations.insert(
            address,
            Station {
                inbox,
                radio_on: radio_on.clone(),
            },
        );
        tracing::debug!(%address, "station attached");

        let radio = Arc::new(SimulatedRadio {
            address,
            medium: self.clone(),
            radio_on,
        });
        (radio, rx)
    }

    /// Make `a` and `b` neighbors of each other.
    pub fn link(&self, a: Address, b: Address) {
        self.neighbors.entry(a).or_default().insert(b);
        self.neighbors.entry(b).or_default().insert(a);
    }

    /// Break the link between `a` and `b`.
    pub fn unlink(&self, a: Address, b: Address) {
        if let Some(mut set) = self.neighbors.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(mut set) = self.neighbors.get_mut(&b) {
            set.remove(&a);
        }
    }

    /// Link `addresses` into a chain, each node hearing only the ones beside it.
    pub fn link_line(&self, addresses: &[Address]) {
        for pair in addresses.windows(2) {
            self.link(pair[0], pair[1]);
        }
    }

    pub fn neighbors(&self, address: Address) -> Vec<Address> {
        self.neighbors
            .get(&address)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Switch a node's radio on or off. Returns `false` for an unknown node.
    pub fn set_radio_on(&self, address: Address, on: bool) -> bool {
        match self.stations.get(&address) {
            Some(station) => {
                station.radio_on.store(on, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Drop each frame with probability `probability` (clamped to `[0, 1]`).
    pub fn set_link_loss(&self, probability: f64) {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        self.loss.store(probability.to_bits(), Ordering::Relaxed);
    }

    pub fn link_loss(&self) -> f64 {
        f64::from_bits(self.loss.load(Ordering::Relaxed))
    }

    fn frame_lost(&self) -> bool {
        let loss = self.link_loss();
        loss > 0.0 && rand::thread_rng().gen_bool(loss)
    }

    /// Total frames handed to receivers so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn deliver_to(&self, from: Address, to: Address, payload: &Bytes) -> bool {
        let Some(station) = self.stations.get(&to) else {
            return false;
        };
        if !station.radio_on.load(Ordering::SeqCst) || self.frame_lost() {
            return false;
        }
        let frame = InboundFrame {
            last_hop: from,
            payload: payload.clone(),
        };
        let delivered = station.inbox.send(frame).is_ok();
        if delivered {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    fn broadcast(&self, from: Address, payload: Bytes) {
        for neighbor in self.neighbors(from) {
            self.deliver_to(from, neighbor, &payload);
        }
    }

    fn unicast(&self, from: Address, to: Address, payload: Bytes) -> Result<(), LinkError> {
        let linked = self
            .neighbors
            .get(&from)
            .map_or(false, |set| set.contains(&to));
        if linked && self.deliver_to(from, to, &payload) {
            Ok(())
        } else {
            Err(LinkError::NoAck(to))
        }
    }
}

/// One node's radio on a [`SimulatedMedium`].
pub struct SimulatedRadio {
    address: Address,
    medium: Arc<SimulatedMedium>,
    radio_on: Arc<AtomicBool>,
}

impl SimulatedRadio {
    pub fn address(&self) -> Address {
        self.address
    }

    fn transmit(&self, next_hop: Address, message: AodvMessage) -> Result<(), LinkError> {
        if !self.is_available() {
            return Err(LinkError::RadioOff);
        }
        let payload = message.encode();
        tracing::trace!(
            from = %self.address,
            to = %next_hop,
            kind = message.kind(),
            frame = %hex::encode(&payload),
            "frame transmitted"
        );
        if next_hop.is_broadcast() {
            self.medium.broadcast(self.address, payload);
            Ok(())
        } else {
            self.medium.unicast(self.address, next_hop, payload)
        }
    }
}

#[async_trait]
impl LinkLayer for SimulatedRadio {
    fn is_available(&self) -> bool {
        self.radio_on.load(Ordering::SeqCst)
    }

    async fn send_request(&self, request: &RouteRequest) -> Result<(), LinkError> {
        self.transmit(Address::BROADCAST, AodvMessage::Request(*request))
    }

    async fn send_reply(&self, next_hop: Address, reply: &RouteReply) -> Result<(), LinkError> {
        self.transmit(next_hop, AodvMessage::Reply(*reply))
    }

    async fn send_error(&self, next_hop: Address, error: &RouteErrorMessage) -> Result<(), LinkError> {
        self.transmit(next_hop, AodvMessage::Error(*error))
    }
}

/// Feed frames from `inbox` into `manager` until `cancel` fires or the
/// medium goes away.
pub fn spawn_receiver(
    manager: Arc<RoutingManager>,
    mut inbox: mpsc::UnboundedReceiver<InboundFrame>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = inbox.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(e) = manager.handle_frame(frame.last_hop, &frame.payload).await {
                tracing::warn!(last_hop = %frame.last_hop, error = %e, "malformed frame dropped");
            }
        }
    })
}
