use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use meshroute_core::{Address, RoutingConfig};
use rand::Rng;
use tokio::sync::Notify;

use crate::client::{CorrelationToken, RouteEventClient, RouteOutcome};
use crate::error::DiscoveryError;

/// Requests this close to their deadline are swept early rather than one
/// full cleaner interval late.
const EXPIRY_SLACK_MS: i64 = 5;

/// Route request identifiers live in `[1, MAX_REQUEST_ID]`.
pub const MAX_REQUEST_ID: u32 = 65_535;

/// Identifies one pending discovery: who is looking for whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub destination: Address,
    pub originator: Address,
}

impl RequestKey {
    pub fn new(destination: Address, originator: Address) -> Self {
        Self {
            destination,
            originator,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.originator, self.destination)
    }
}

/// A client waiting on a request, with the token it gets back.
#[derive(Clone)]
pub struct Waiter {
    client: Arc<dyn RouteEventClient>,
    token: CorrelationToken,
}

impl Waiter {
    pub fn new(client: Arc<dyn RouteEventClient>, token: CorrelationToken) -> Self {
        Self { client, token }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub fn client(&self) -> &Arc<dyn RouteEventClient> {
        &self.client
    }

    pub fn notify(&self, outcome: RouteOutcome) {
        self.client.route_event(outcome, self.token);
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("token", &self.token).finish()
    }
}

/// An outstanding route discovery.
///
/// Entries order by `expiry_time` alone: two entries with the same deadline
/// compare equal even when they describe different discoveries.
#[derive(Debug, Clone)]
pub struct RequestEntry {
    pub key: RequestKey,
    pub request_id: u32,
    pub expiry_time: DateTime<Utc>,
    /// Set while a reply for this request is being processed.
    pub active: bool,
    waiters: Vec<Waiter>,
}

impl RequestEntry {
    pub fn new(key: RequestKey, request_id: u32, expiry_time: DateTime<Utc>) -> Self {
        Self {
            key,
            request_id,
            expiry_time,
            active: false,
            waiters: Vec::new(),
        }
    }

    pub fn with_waiter(mut self, client: Arc<dyn RouteEventClient>, token: CorrelationToken) -> Self {
        self.waiters.push(Waiter::new(client, token));
        self
    }

    pub fn destination(&self) -> Address {
        self.key.destination
    }

    pub fn originator(&self) -> Address {
        self.key.originator
    }

    /// The client that created the request, if any.
    pub fn client(&self) -> Option<&Arc<dyn RouteEventClient>> {
        self.waiters.first().map(Waiter::client)
    }

    /// The token of the client that created the request, if any.
    pub fn correlation_token(&self) -> Option<CorrelationToken> {
        self.waiters.first().map(Waiter::token)
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    /// Remove and return the waiters, leaving the entry without clients.
    pub fn take_waiters(&mut self) -> Vec<Waiter> {
        std::mem::take(&mut self.waiters)
    }

    /// Whether a sweep at `now` should evict this entry. An active entry
    /// survives its deadline by at most `grace`.
    pub fn is_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let cutoff = now + chrono::Duration::milliseconds(EXPIRY_SLACK_MS);
        if self.expiry_time >= cutoff {
            return false;
        }
        if !self.active {
            return true;
        }
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        self.expiry_time + grace < cutoff
    }
}

impl PartialEq for RequestEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry_time == other.expiry_time
    }
}

impl Eq for RequestEntry {}

impl PartialOrd for RequestEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expiry_time.cmp(&other.expiry_time)
    }
}

/// Told once about every request that leaves the table through `resolve`,
/// an expiry sweep or `fail_all`, after its waiters have been notified.
pub trait RequestObserver: Send + Sync {
    fn request_closed(&self, entry: &RequestEntry, outcome: &RouteOutcome);
}

/// Result of inserting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// A new entry was created; the caller should emit the RREQ.
    Created,
    /// A discovery for the same key was already pending; the caller's
    /// waiters were attached to it and will be notified with it.
    AlreadyPending,
}

struct RequestState {
    entries: HashMap<RequestKey, RequestEntry>,
    /// Ids of forwarded requests swept from `entries`, kept until the
    /// deadline so late copies of the same RREQ are still recognized.
    recent: HashMap<RequestKey, (u32, DateTime<Utc>)>,
    last_request_id: u32,
}

/// Outstanding route discoveries with timed expiry.
///
/// Every operation holds the table lock for its whole check-then-act, so a
/// reply and an expiry sweep can never both claim the same entry. Clients are
/// notified only after the lock is released and may call back into the table.
pub struct RequestTable {
    state: Mutex<RequestState>,
    not_empty: Notify,
    path_discovery_time: Duration,
    active_grace_period: Duration,
    observer: Option<Arc<dyn RequestObserver>>,
}

impl RequestTable {
    /// Create an empty table. The request id counter starts at a random value.
    pub fn new(config: &RoutingConfig) -> Self {
        let first_id = rand::thread_rng().gen_range(1..=MAX_REQUEST_ID);
        Self {
            state: Mutex::new(RequestState {
                entries: HashMap::new(),
                recent: HashMap::new(),
                last_request_id: first_id,
            }),
            not_empty: Notify::new(),
            path_discovery_time: config.path_discovery_time,
            active_grace_period: config.active_grace_period,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn close(&self, entry: &RequestEntry, outcome: RouteOutcome) {
        for waiter in &entry.waiters {
            waiter.notify(outcome.clone());
        }
        if let Some(observer) = &self.observer {
            observer.request_closed(entry, &outcome);
        }
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deadline for a request issued at `now`.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lifetime = chrono::Duration::from_std(self.path_discovery_time)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + lifetime
    }

    /// The next route request identifier, rolling over from 65535 to 1.
    pub fn next_request_id(&self) -> u32 {
        let mut state = self.state();
        state.last_request_id = if state.last_request_id >= MAX_REQUEST_ID {
            1
        } else {
            state.last_request_id + 1
        };
        state.last_request_id
    }

    /// Insert `entry`, or attach its waiters to the live entry for its key.
    pub fn insert(&self, entry: RequestEntry) -> InsertResult {
        let key = entry.key;
        let result = {
            let mut state = self.state();
            match state.entries.entry(key) {
                Entry::Occupied(mut existing) => {
                    existing.get_mut().waiters.extend(entry.waiters);
                    InsertResult::AlreadyPending
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                    InsertResult::Created
                }
            }
        };

        tracing::debug!(request = %key, result = ?result, "request table insert");
        if result == InsertResult::Created {
            self.not_empty.notify_waiters();
        }
        result
    }

    /// Record a route request seen from another originator, replacing any
    /// older request for the same key. Attached waiters are kept.
    pub fn record_forwarded(&self, key: RequestKey, request_id: u32, now: DateTime<Utc>) {
        let expiry_time = self.expiry_from(now);
        {
            let mut state = self.state();
            state.recent.remove(&key);
            let waiters = state
                .entries
                .remove(&key)
                .map(|mut old| old.take_waiters())
                .unwrap_or_default();
            let mut entry = RequestEntry::new(key, request_id, expiry_time);
            entry.waiters = waiters;
            state.entries.insert(key, entry);
        }
        self.not_empty.notify_waiters();
    }

    /// Whether a request with this key and identifier is already recorded,
    /// or was forwarded and swept less than one discovery period ago.
    pub fn has_request(&self, key: RequestKey, request_id: u32) -> bool {
        self.has_request_at(key, request_id, Utc::now())
    }

    pub fn has_request_at(&self, key: RequestKey, request_id: u32, now: DateTime<Utc>) -> bool {
        let state = self.state();
        if let Some(entry) = state.entries.get(&key) {
            return entry.request_id == request_id;
        }
        state
            .recent
            .get(&key)
            .map_or(false, |(id, until)| *id == request_id && *until > now)
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.state().entries.contains_key(&key)
    }

    /// A copy of the entry for `key`.
    pub fn get(&self, key: RequestKey) -> Option<RequestEntry> {
        self.state().entries.get(&key).cloned()
    }

    /// Mark the entry as being processed (or done processing).
    /// Returns `false` when there is no entry for `key`.
    pub fn set_active(&self, key: RequestKey, active: bool) -> bool {
        match self.state().entries.get_mut(&key) {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `key` and notify every waiter with `outcome`.
    /// Returns `false` for an unknown key (late or duplicate reply).
    pub fn resolve(&self, key: RequestKey, outcome: RouteOutcome) -> bool {
        let removed = self.state().entries.remove(&key);
        let Some(entry) = removed else {
            tracing::trace!(request = %key, "resolve for unknown request ignored");
            return false;
        };

        tracing::debug!(
            request = %key,
            request_id = entry.request_id,
            waiters = entry.waiters.len(),
            found = outcome.route().is_some(),
            "request resolved"
        );
        self.close(&entry, outcome);
        true
    }

    /// Remove the entry for `key` without notifying anyone.
    pub fn remove(&self, key: RequestKey) -> Option<RequestEntry> {
        self.state().entries.remove(&key)
    }

    /// Evict every expired entry and report a timeout to its waiters.
    /// Returns the number of entries evicted.
    pub fn clean_table(&self) -> usize {
        self.clean_table_at(Utc::now())
    }

    pub fn clean_table_at(&self, now: DateTime<Utc>) -> usize {
        let grace = self.active_grace_period;
        let remembered_until = self.expiry_from(now);
        let mut expired: Vec<RequestEntry> = {
            let mut state = self.state();
            state.recent.retain(|_, (_, until)| *until > now);
            let keys: Vec<RequestKey> = state
                .entries
                .values()
                .filter(|entry| entry.is_expired(now, grace))
                .map(|entry| entry.key)
                .collect();
            let expired: Vec<RequestEntry> = keys
                .iter()
                .filter_map(|key| state.entries.remove(key))
                .collect();
            for entry in expired.iter().filter(|entry| entry.waiters.is_empty()) {
                state
                    .recent
                    .insert(entry.key, (entry.request_id, remembered_until));
            }
            expired
        };
        expired.sort();

        for entry in &expired {
            let destination = entry.destination();
            tracing::debug!(
                request = %entry.key,
                request_id = entry.request_id,
                was_active = entry.active,
                "request expired"
            );
            self.close(
                entry,
                RouteOutcome::Failed {
                    destination,
                    error: DiscoveryError::Timeout { destination },
                },
            );
        }
        expired.len()
    }

    /// Remove every entry, failing its waiters with `error`.
    pub fn fail_all(&self, error: DiscoveryError) -> usize {
        let drained: Vec<RequestEntry> = {
            let mut state = self.state();
            state.recent.clear();
            state.entries.drain().map(|(_, e)| e).collect()
        };
        for entry in &drained {
            self.close(
                entry,
                RouteOutcome::Failed {
                    destination: entry.destination(),
                    error: error.clone(),
                },
            );
        }
        drained.len()
    }

    /// Suspend until the table holds at least one entry.
    pub async fn wait_until_not_empty(&self) {
        loop {
            let notified = self.not_empty.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new(&RoutingConfig::default())
    }
}
