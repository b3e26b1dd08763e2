//! The on-demand routing engine.
//!
//! [`RoutingManager`] answers route queries from its [`RouteTable`], starts
//! discoveries through the [`LinkLayer`] when a route is missing, and runs the
//! receive path for RREQ, RREP and RERR frames. Pending discoveries live in a
//! [`RequestTable`] swept by a [`RequestTableCleaner`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshroute_core::{
    Address, AodvMessage, CoreError, DestinationEvent, DestinationState, DestinationStateMachine,
    RouteErrorMessage, RouteReply, RouteRequest, RoutingConfig,
};
use rand::Rng;
use uuid::Uuid;

use crate::cleaner::RequestTableCleaner;
use crate::client::{CorrelationToken, OneshotClient, RouteEventClient, RouteOutcome};
use crate::error::{DiscoveryError, LinkError, NoRouteError, RoutingError};
use crate::events::{ListenerId, ListenerRegistry, RoutingEvent, RoutingEventListener};
use crate::link::LinkLayer;
use crate::policy::RoutingPolicyManager;
use crate::request::{InsertResult, RequestEntry, RequestKey, RequestObserver, RequestTable};
use crate::route_table::{RouteEntry, RouteObserver, RouteTable, RouteUpdate};

/// Attempts made to unicast a route reply before the route is dropped.
const MAX_REPLY_ATTEMPTS: usize = 3;
/// Upper bound of the random back-off between reply attempts.
const MAX_RETRY_DELAY_MS: u64 = 50;

/// Per-destination discovery state, driven by the state machine.
/// Destinations back in `NoRoute` are not stored.
#[derive(Default)]
struct DestinationTracker {
    states: DashMap<Address, DestinationState>,
}

impl DestinationTracker {
    fn get(&self, destination: Address) -> DestinationState {
        self.states
            .get(&destination)
            .map_or(DestinationState::NoRoute, |s| *s)
    }

    fn apply(&self, destination: Address, event: DestinationEvent) {
        let current = match self.states.entry(destination) {
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                match DestinationStateMachine::transition(current, event) {
                    Ok(DestinationState::NoRoute) => {
                        slot.remove();
                        return;
                    }
                    Ok(next) => {
                        slot.insert(next);
                        return;
                    }
                    Err(_) => current,
                }
            }
            Entry::Vacant(slot) => {
                match DestinationStateMachine::transition(DestinationState::NoRoute, event) {
                    Ok(DestinationState::NoRoute) => return,
                    Ok(next) => {
                        slot.insert(next);
                        return;
                    }
                    Err(_) => DestinationState::NoRoute,
                }
            }
        };
        tracing::trace!(%destination, state = %current, event = ?event, "destination state unchanged");
    }
}

impl RouteObserver for DestinationTracker {
    fn routes_expired(&self, destinations: &[Address]) {
        for destination in destinations {
            self.apply(*destination, DestinationEvent::RouteInvalidated);
        }
    }
}

impl RequestObserver for DestinationTracker {
    fn request_closed(&self, entry: &RequestEntry, outcome: &RouteOutcome) {
        // Requests recorded while forwarding have no clients and no state.
        if entry.client().is_none() {
            return;
        }
        let event = match outcome {
            RouteOutcome::Found(_) => DestinationEvent::RouteFound,
            RouteOutcome::Failed { .. } => DestinationEvent::DiscoveryFailed,
        };
        self.apply(entry.destination(), event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

struct Binding {
    our_address: Address,
    link: Arc<dyn LinkLayer>,
}

/// Orchestrates route discovery for one node.
pub struct RoutingManager {
    config: RoutingConfig,
    policy: Arc<RoutingPolicyManager>,
    routes: Arc<RouteTable>,
    requests: Arc<RequestTable>,
    cleaner: RequestTableCleaner,
    listeners: ListenerRegistry,
    tracker: Arc<DestinationTracker>,
    binding: OnceLock<Binding>,
    lifecycle: Mutex<Lifecycle>,
    sequence: AtomicU32,
}

impl RoutingManager {
    /// Build an engine that is not yet bound to an address or link.
    pub fn new(config: RoutingConfig, policy: Arc<RoutingPolicyManager>) -> Self {
        let tracker = Arc::new(DestinationTracker::default());
        let routes = Arc::new(RouteTable::new(&config).with_observer(tracker.clone()));
        let requests = Arc::new(RequestTable::new(&config).with_observer(tracker.clone()));
        let cleaner = RequestTableCleaner::new(requests.clone(), config.request_cleaner_interval)
            .with_route_table(routes.clone());

        Self {
            config,
            policy,
            routes,
            requests,
            cleaner,
            listeners: ListenerRegistry::new(),
            tracker,
            binding: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            sequence: AtomicU32::new(0),
        }
    }

    /// Bind the engine to our address and link layer. Only the first call succeeds.
    pub fn initialize(&self, our_address: Address, link: Arc<dyn LinkLayer>) -> Result<(), RoutingError> {
        if self.binding.set(Binding { our_address, link }).is_err() {
            let bound = self.our_address().unwrap_or(our_address);
            return Err(RoutingError::AlreadyInitialized(bound));
        }
        tracing::info!(address = %our_address, policy = %self.policy.policy(), "routing manager initialized");
        Ok(())
    }

    /// Start the request cleaner and accept discoveries.
    pub fn start(&self) -> Result<(), RoutingError> {
        let binding = self.binding.get().ok_or(RoutingError::NotInitialized)?;
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|p| p.into_inner());
        match *lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Stopped => Err(RoutingError::AlreadyStopped),
            Lifecycle::Created => {
                self.cleaner.start();
                *lifecycle = Lifecycle::Running;
                tracing::info!(address = %binding.our_address, "routing manager started");
                Ok(())
            }
        }
    }

    /// Stop the cleaner and fail every pending discovery. Idempotent.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|p| p.into_inner());
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }
        self.cleaner.shutdown().await;
        let failed = self.requests.fail_all(DiscoveryError::Stopped);
        tracing::info!(failed_requests = failed, "routing manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn running_binding(&self) -> Result<&Binding, NoRouteError> {
        let binding = self.binding.get().ok_or(NoRouteError::NotInitialized)?;
        match self.lifecycle() {
            Lifecycle::Created => Err(NoRouteError::NotStarted),
            Lifecycle::Running => Ok(binding),
            Lifecycle::Stopped => Err(NoRouteError::Stopped),
        }
    }

    pub fn our_address(&self) -> Option<Address> {
        self.binding.get().map(|b| b.our_address)
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn policy_manager(&self) -> &Arc<RoutingPolicyManager> {
        &self.policy
    }

    /// Next own sequence number, wrapping from `u32::MAX` back to 1.
    pub fn next_sequence_number(&self) -> u32 {
        let previous = self
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seq| {
                Some(if seq == u32::MAX { 1 } else { seq + 1 })
            })
            .unwrap_or(0);
        if previous == u32::MAX {
            1
        } else {
            previous + 1
        }
    }

    // --- Queries ---

    /// The cached route to `address`, without starting a discovery.
    pub fn get_route_info(&self, address: Address) -> Option<RouteEntry> {
        self.routes.lookup(address)
    }

    /// A copy of the route table.
    pub fn route_snapshot(&self) -> Vec<RouteEntry> {
        self.routes.snapshot()
    }

    pub fn destination_state(&self, destination: Address) -> DestinationState {
        self.tracker.get(destination)
    }

    /// Our own pending discovery for `destination`, if any.
    pub fn pending_request(&self, destination: Address) -> Option<RequestEntry> {
        let our_address = self.our_address()?;
        self.requests.get(RequestKey::new(destination, our_address))
    }

    /// Number of request table entries, including requests recorded while forwarding.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    // --- Listeners ---

    pub fn add_event_listener(&self, listener: Arc<dyn RoutingEventListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // --- Discovery ---

    /// Look up or discover a route to `destination`.
    ///
    /// Returns `Ok(true)` when a route is cached. Otherwise a route request is
    /// started (or joined, if one is already pending) and `Ok(false)` is
    /// returned; the outcome is delivered to `client` exactly once.
    pub async fn find_route(
        &self,
        destination: Address,
        client: Arc<dyn RouteEventClient>,
        token: CorrelationToken,
    ) -> Result<bool, NoRouteError> {
        let binding = self.running_binding()?;
        let our_address = binding.our_address;
        if destination == our_address {
            return Err(NoRouteError::SelfDiscovery(destination));
        }

        if let Some(route) = self.routes.lookup(destination) {
            self.routes.freshen(destination);
            if route.next_hop != destination {
                self.routes.freshen(route.next_hop);
            }
            tracing::debug!(%route, "route cache hit");
            return Ok(true);
        }

        if !binding.link.is_available() {
            return Err(NoRouteError::RadioUnavailable(LinkError::RadioOff));
        }

        let key = RequestKey::new(destination, our_address);
        let request_id = self.requests.next_request_id();
        let entry = RequestEntry::new(key, request_id, self.requests.expiry_from(Utc::now()))
            .with_waiter(client, token);
        if self.requests.insert(entry) == InsertResult::AlreadyPending {
            tracing::debug!(%destination, %token, "joined pending route discovery");
            return Ok(false);
        }
        self.tracker.apply(destination, DestinationEvent::DiscoveryStarted);

        let request = RouteRequest {
            hop_count: 0,
            request_id,
            destination,
            destination_seq: self.routes.destination_seq(destination),
            originator: our_address,
            originator_seq: self.next_sequence_number(),
            destination_only: false,
            gratuitous_reply: false,
        };

        match binding.link.send_request(&request).await {
            Ok(()) => {
                tracing::info!(%destination, request_id, "route discovery started");
                self.listeners.emit(RoutingEvent::RreqSent {
                    originator: our_address,
                    destination,
                    hop_count: 0,
                });
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(%destination, error = %e, "route request could not be sent");
                if let Some(mut entry) = self.requests.remove(key) {
                    let outcome = RouteOutcome::Failed {
                        destination,
                        error: DiscoveryError::Link {
                            destination,
                            source: e.clone(),
                        },
                    };
                    // Anyone who joined in the meantime hears about it through
                    // the callback; the caller gets the error returned.
                    for waiter in entry.take_waiters().iter().filter(|w| w.token() != token) {
                        waiter.notify(outcome.clone());
                    }
                }
                self.tracker.apply(destination, DestinationEvent::DiscoveryFailed);
                Err(NoRouteError::RadioUnavailable(e))
            }
        }
    }

    /// Find a route and wait for the outcome of the discovery.
    pub async fn discover(&self, destination: Address) -> Result<RouteOutcome, NoRouteError> {
        let (client, rx) = OneshotClient::new();
        if self.find_route(destination, Arc::new(client), Uuid::now_v7()).await? {
            if let Some(route) = self.routes.lookup(destination) {
                return Ok(RouteOutcome::Found(route));
            }
        }
        Ok(rx.await.unwrap_or(RouteOutcome::Failed {
            destination,
            error: DiscoveryError::Stopped,
        }))
    }

    /// Install `route` and complete our pending discovery for its destination.
    /// Returns `false` if no discovery of ours was pending.
    pub fn resolve_route(&self, route: RouteEntry) -> bool {
        let Some(our_address) = self.our_address() else {
            return false;
        };
        let key = RequestKey::new(route.destination, our_address);
        self.requests.set_active(key, true);
        self.routes.insert_or_replace(route);
        let resolved = self.requests.resolve(key, RouteOutcome::Found(route));
        if !resolved {
            self.tracker.apply(route.destination, DestinationEvent::RouteLearned);
        }
        resolved
    }

    /// Drop the route to `destination` after a delivery failure reported for
    /// `originator`'s traffic. A remote originator is sent a RERR.
    /// Returns whether a route was removed.
    pub async fn invalidate_route(&self, originator: Address, destination: Address) -> bool {
        if !self.routes.invalidate(destination) {
            return false;
        }
        self.tracker.apply(destination, DestinationEvent::RouteInvalidated);

        let local = self.our_address().map_or(true, |us| us == originator);
        if !local && self.is_running() {
            self.send_error(RouteErrorMessage::new(originator, destination)).await;
        }
        self.listeners.emit(RoutingEvent::RerrSent {
            originator,
            destination,
        });
        true
    }

    /// A neighbor stopped acknowledging: drop every route through it.
    /// Returns the destinations that lost their route.
    pub async fn link_failed(&self, neighbor: Address) -> Vec<Address> {
        let lost = self.routes.invalidate_next_hop(neighbor);
        let originator = self.our_address().unwrap_or(Address::BROADCAST);
        for destination in &lost {
            self.tracker.apply(*destination, DestinationEvent::RouteInvalidated);
            self.listeners.emit(RoutingEvent::RerrSent {
                originator,
                destination: *destination,
            });
        }
        if !lost.is_empty() {
            tracing::info!(%neighbor, lost = lost.len(), "link to neighbor failed");
        }
        lost
    }

    /// Broadcast a neighbor advertisement so neighbors learn a route to us.
    pub async fn advertise(&self) -> Result<(), NoRouteError> {
        let binding = self.running_binding()?;
        let advert = RouteReply {
            hop_count: 0,
            destination: binding.our_address,
            destination_seq: self.next_sequence_number(),
            originator: Address::BROADCAST,
            originator_seq: 0,
            ack_required: false,
        };
        binding.link.send_reply(Address::BROADCAST, &advert).await?;
        Ok(())
    }

    // --- Receive path ---

    /// Decode a received frame and process it.
    pub async fn handle_frame(&self, last_hop: Address, frame: &[u8]) -> Result<(), CoreError> {
        let message = AodvMessage::decode(frame)?;
        self.handle_message(last_hop, message).await;
        Ok(())
    }

    /// Process a control message received from neighbor `last_hop`.
    pub async fn handle_message(&self, last_hop: Address, message: AodvMessage) {
        let Ok(binding) = self.running_binding() else {
            tracing::debug!(kind = message.kind(), %last_hop, "engine not running, frame dropped");
            return;
        };
        match message {
            AodvMessage::Request(request) => self.handle_request(binding, last_hop, request).await,
            AodvMessage::Reply(reply) => self.handle_reply(binding, last_hop, reply).await,
            AodvMessage::Error(error) => self.handle_error(binding, error).await,
        }
    }

    async fn handle_request(&self, binding: &Binding, last_hop: Address, mut request: RouteRequest) {
        let our_address = binding.our_address;
        if request.originator == our_address {
            return;
        }

        let hop_count = u32::from(request.increment_hop_count());
        if hop_count > self.config.net_diameter {
            tracing::debug!(originator = %request.originator, hop_count, "RREQ beyond network diameter dropped");
            return;
        }

        let key = RequestKey::new(request.destination, request.originator);
        if self.requests.has_request(key, request.request_id) {
            let better_known = self
                .routes
                .lookup(request.originator)
                .map_or(false, |reverse| reverse.hop_count <= hop_count);
            if better_known {
                tracing::trace!(request = %key, request_id = request.request_id, "duplicate RREQ dropped");
                return;
            }
        }

        self.listeners.emit(RoutingEvent::RreqReceived {
            originator: request.originator,
            destination: request.destination,
            hop_count,
        });

        self.requests.record_forwarded(key, request.request_id, Utc::now());
        if last_hop != request.originator {
            self.learn(our_address, RouteEntry::neighbor(last_hop), 0);
        }
        self.learn(
            our_address,
            RouteEntry::new(request.originator, last_hop, hop_count),
            request.originator_seq,
        );

        let known_seq = self.routes.destination_seq(request.destination);
        if known_seq > request.destination_seq {
            request.destination_seq = known_seq;
        }

        if request.destination == our_address {
            let reply = RouteReply::answering(&request, self.next_sequence_number());
            self.send_reply(binding, reply).await;
        } else if self.policy.is_end_node() {
            tracing::trace!(request = %key, "end node, RREQ not forwarded");
        } else {
            match binding.link.send_request(&request).await {
                Ok(()) => self.listeners.emit(RoutingEvent::RreqSent {
                    originator: request.originator,
                    destination: request.destination,
                    hop_count,
                }),
                Err(e) => tracing::warn!(request = %key, error = %e, "RREQ forward failed"),
            }
        }
    }

    async fn handle_reply(&self, binding: &Binding, last_hop: Address, mut reply: RouteReply) {
        let our_address = binding.our_address;
        let hop_count = u32::from(reply.increment_hop_count());

        self.listeners.emit(RoutingEvent::RrepReceived {
            originator: reply.originator,
            destination: reply.destination,
            hop_count,
        });

        if reply.originator.is_broadcast() {
            if self.routes.lookup(reply.destination).is_none() {
                self.learn(
                    our_address,
                    RouteEntry::new(reply.destination, last_hop, hop_count),
                    reply.destination_seq,
                );
            }
            return;
        }

        if last_hop != reply.destination {
            self.learn(our_address, RouteEntry::neighbor(last_hop), 0);
        }
        let route = RouteEntry::new(reply.destination, last_hop, hop_count);

        if reply.originator == our_address {
            let key = RequestKey::new(reply.destination, our_address);
            self.requests.set_active(key, true);
            self.routes.offer(route, reply.destination_seq);
            let installed = self.routes.lookup(reply.destination).unwrap_or(route);
            if self.requests.resolve(key, RouteOutcome::Found(installed)) {
                tracing::info!(route = %installed, "route discovered");
            } else {
                tracing::debug!(route = %installed, "late RREP, route kept");
                self.tracker.apply(reply.destination, DestinationEvent::RouteLearned);
            }
            return;
        }

        self.learn(our_address, route, reply.destination_seq);
        if self.policy.is_end_node() {
            tracing::trace!(destination = %reply.destination, "end node, RREP not forwarded");
            return;
        }
        self.send_reply(binding, reply).await;
    }

    async fn handle_error(&self, binding: &Binding, error: RouteErrorMessage) {
        let our_address = binding.our_address;
        self.listeners.emit(RoutingEvent::RerrReceived {
            originator: error.originator,
            destination: error.destination,
        });

        if self.routes.invalidate(error.destination) {
            self.tracker.apply(error.destination, DestinationEvent::RouteInvalidated);
        }

        if error.originator == our_address {
            let destination = error.destination;
            self.requests.resolve(
                RequestKey::new(destination, our_address),
                RouteOutcome::Failed {
                    destination,
                    error: DiscoveryError::RouteError { destination },
                },
            );
            return;
        }

        if self.send_error(error).await {
            self.listeners.emit(RoutingEvent::RerrSent {
                originator: error.originator,
                destination: error.destination,
            });
        }
    }

    // --- Send helpers ---

    fn learn(&self, our_address: Address, route: RouteEntry, destination_seq: u32) {
        if route.destination == our_address {
            return;
        }
        let update = self.routes.offer(route, destination_seq);
        let discovering = self
            .requests
            .contains(RequestKey::new(route.destination, our_address));
        if update != RouteUpdate::Refreshed && !discovering {
            self.tracker.apply(route.destination, DestinationEvent::RouteLearned);
        }
    }

    /// Unicast `reply` toward its originator, retrying on missing acks.
    async fn send_reply(&self, binding: &Binding, reply: RouteReply) {
        let Some(reverse) = self.routes.lookup(reply.originator) else {
            tracing::debug!(originator = %reply.originator, "no reverse route for RREP");
            return;
        };

        for attempt in 1..=MAX_REPLY_ATTEMPTS {
            match binding.link.send_reply(reverse.next_hop, &reply).await {
                Ok(()) => {
                    self.listeners.emit(RoutingEvent::RrepSent {
                        originator: reply.originator,
                        destination: reply.destination,
                        hop_count: u32::from(reply.hop_count),
                    });
                    return;
                }
                Err(LinkError::NoAck(_)) if attempt < MAX_REPLY_ATTEMPTS => {
                    let delay = rand::thread_rng().gen_range(0..MAX_RETRY_DELAY_MS);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    tracing::warn!(
                        originator = %reply.originator,
                        next_hop = %reverse.next_hop,
                        attempt,
                        error = %e,
                        "RREP could not be delivered"
                    );
                    break;
                }
            }
        }

        if self.routes.invalidate(reply.originator) {
            self.tracker.apply(reply.originator, DestinationEvent::RouteInvalidated);
        }
        if reply.destination != binding.our_address {
            let error = RouteErrorMessage::new(reply.destination, reply.originator);
            if self.send_error(error).await {
                self.listeners.emit(RoutingEvent::RerrSent {
                    originator: error.originator,
                    destination: error.destination,
                });
            }
        }
    }

    /// Unicast `error` one hop toward its originator. Sent once only, since
    /// the failing link may be the one on the way back.
    async fn send_error(&self, error: RouteErrorMessage) -> bool {
        let Some(binding) = self.binding.get() else {
            return false;
        };
        let Some(route) = self.routes.lookup(error.originator) else {
            tracing::debug!(originator = %error.originator, "no route to deliver RERR");
            return false;
        };
        match binding.link.send_error(route.next_hop, &error).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(originator = %error.originator, error = %e, "RERR could not be delivered");
                if self.routes.invalidate(error.originator) {
                    self.tracker.apply(error.originator, DestinationEvent::RouteInvalidated);
                }
                false
            }
        }
    }
}
