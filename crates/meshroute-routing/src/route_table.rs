use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshroute_core::{Address, RoutingConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::RoutingError;

/// A known route: reach `destination` by handing packets to `next_hop`.
///
/// Serializes as `dest:next_hop:hops`, with both addresses in dotted hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Address,
    pub next_hop: Address,
    pub hop_count: u32,
}

impl RouteEntry {
    pub fn new(destination: Address, next_hop: Address, hop_count: u32) -> Self {
        Self {
            destination,
            next_hop,
            hop_count,
        }
    }

    /// A route to a direct neighbor.
    pub fn neighbor(address: Address) -> Self {
        Self::new(address, address, 1)
    }

    /// Validate that the entry describes a usable route.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.hop_count == 0 {
            return Err(RoutingError::InvalidRouteEntry {
                reason: format!("hop count for {} must be at least 1", self.destination),
            });
        }
        if self.hop_count == 1 && self.next_hop != self.destination {
            return Err(RoutingError::InvalidRouteEntry {
                reason: format!(
                    "single-hop route to {} goes through {}",
                    self.destination, self.next_hop
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.destination, self.next_hop, self.hop_count)
    }
}

impl FromStr for RouteEntry {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| RoutingError::InvalidRouteString {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(':').collect();
        let [destination, next_hop, hops] = parts.as_slice() else {
            return Err(invalid(format!("expected 3 fields, got {}", parts.len())));
        };

        let destination: Address = destination.parse().map_err(|e| invalid(format!("{e}")))?;
        let next_hop: Address = next_hop.parse().map_err(|e| invalid(format!("{e}")))?;
        let hop_count: u32 = hops
            .trim()
            .parse()
            .map_err(|e| invalid(format!("hop count: {e}")))?;

        Ok(Self::new(destination, next_hop, hop_count))
    }
}

/// What `RouteTable::offer` did with a learned route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// No route existed; the offered one was installed.
    Inserted,
    /// The offered route replaced a worse or stale one.
    Replaced,
    /// The existing route was kept and its lifetime extended.
    Refreshed,
}

#[derive(Debug, Clone)]
struct RouteSlot {
    entry: RouteEntry,
    destination_seq: u32,
    active: bool,
    expires_at: DateTime<Utc>,
}

/// Told about routes deleted by aging, after the table has released them.
pub trait RouteObserver: Send + Sync {
    fn routes_expired(&self, destinations: &[Address]);
}

/// The authoritative route cache, one route per destination.
///
/// Routes age in two phases: an active route that is not refreshed within
/// `active_route_timeout` becomes inactive, and an inactive route is deleted
/// after a further `delete_period`. Callers only ever see copies.
pub struct RouteTable {
    routes: DashMap<Address, RouteSlot>,
    not_empty: Notify,
    active_route_timeout: Duration,
    delete_period: Duration,
    observer: Option<Arc<dyn RouteObserver>>,
}

fn deadline(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    let lifetime = chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::days(365));
    now + lifetime
}

impl RouteTable {
    /// Create an empty table using the timeouts in `config`.
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            routes: DashMap::new(),
            not_empty: Notify::new(),
            active_route_timeout: config.active_route_timeout,
            delete_period: config.delete_period,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RouteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The route to `destination`, if one is cached (active or not yet deleted).
    pub fn lookup(&self, destination: Address) -> Option<RouteEntry> {
        self.routes.get(&destination).map(|slot| slot.entry)
    }

    /// Whether the cached route to `destination` is active.
    pub fn is_active(&self, destination: Address) -> bool {
        self.routes
            .get(&destination)
            .map_or(false, |slot| slot.active)
    }

    /// Last known sequence number for `destination`, 0 when unknown.
    pub fn destination_seq(&self, destination: Address) -> u32 {
        self.routes
            .get(&destination)
            .map_or(0, |slot| slot.destination_seq)
    }

    /// Install `entry` unconditionally. Returns the entry it replaced.
    pub fn insert_or_replace(&self, entry: RouteEntry) -> Option<RouteEntry> {
        self.insert_or_replace_at(entry, 0, Utc::now())
    }

    pub fn insert_or_replace_at(
        &self,
        entry: RouteEntry,
        destination_seq: u32,
        now: DateTime<Utc>,
    ) -> Option<RouteEntry> {
        let slot = RouteSlot {
            entry,
            destination_seq,
            active: true,
            expires_at: deadline(now, self.active_route_timeout),
        };
        let previous = self.routes.insert(entry.destination, slot).map(|old| old.entry);
        tracing::debug!(route = %entry, replaced = previous.is_some(), "route installed");
        self.not_empty.notify_waiters();
        previous
    }

    /// Offer a route learned from RREQ/RREP traffic.
    ///
    /// An active route is only replaced by one with fewer hops; otherwise it
    /// is refreshed. An inactive route is revived when the offer goes through
    /// the same next hop and replaced when it does not.
    pub fn offer(&self, entry: RouteEntry, destination_seq: u32) -> RouteUpdate {
        self.offer_at(entry, destination_seq, Utc::now())
    }

    pub fn offer_at(
        &self,
        entry: RouteEntry,
        destination_seq: u32,
        now: DateTime<Utc>,
    ) -> RouteUpdate {
        let expires_at = deadline(now, self.active_route_timeout);
        let fresh = RouteSlot {
            entry,
            destination_seq,
            active: true,
            expires_at,
        };

        let mut slot = match self.routes.get_mut(&entry.destination) {
            Some(slot) => slot,
            None => {
                self.routes.insert(entry.destination, fresh);
                tracing::debug!(route = %entry, "route learned");
                self.not_empty.notify_waiters();
                return RouteUpdate::Inserted;
            }
        };

        let replace = if slot.active {
            slot.entry.hop_count > entry.hop_count
        } else {
            slot.entry.next_hop != entry.next_hop
        };

        if replace {
            tracing::debug!(old = %slot.entry, new = %entry, "route replaced");
            *slot = fresh;
            RouteUpdate::Replaced
        } else {
            slot.active = true;
            slot.expires_at = expires_at;
            RouteUpdate::Refreshed
        }
    }

    /// Reactivate the route to `destination` and extend its lifetime.
    pub fn freshen(&self, destination: Address) -> bool {
        self.freshen_at(destination, Utc::now())
    }

    pub fn freshen_at(&self, destination: Address, now: DateTime<Utc>) -> bool {
        match self.routes.get_mut(&destination) {
            Some(mut slot) => {
                slot.active = true;
                slot.expires_at = deadline(now, self.active_route_timeout);
                true
            }
            None => false,
        }
    }

    /// Remove the route to `destination`. Returns whether a route was removed.
    pub fn invalidate(&self, destination: Address) -> bool {
        match self.routes.remove(&destination) {
            Some((_, slot)) => {
                tracing::debug!(route = %slot.entry, "route invalidated");
                true
            }
            None => false,
        }
    }

    /// Remove every route whose next hop is `neighbor`.
    /// Returns the destinations that lost their route.
    pub fn invalidate_next_hop(&self, neighbor: Address) -> Vec<Address> {
        let mut lost = Vec::new();
        self.routes.retain(|destination, slot| {
            if slot.entry.next_hop == neighbor {
                lost.push(*destination);
                false
            } else {
                true
            }
        });
        lost.sort();
        lost
    }

    /// Age routes relative to `now`: expired active routes become inactive
    /// for `delete_period`, expired inactive routes are deleted.
    /// Returns the destinations whose route was deleted.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<Address> {
        let delete_period = self.delete_period;
        let mut deleted = Vec::new();
        self.routes.retain(|destination, slot| {
            if slot.expires_at > now {
                return true;
            }
            if slot.active {
                slot.active = false;
                slot.expires_at = deadline(now, delete_period);
                true
            } else {
                deleted.push(*destination);
                false
            }
        });
        deleted.sort();

        if !deleted.is_empty() {
            tracing::debug!(count = deleted.len(), "routes aged out");
            if let Some(observer) = &self.observer {
                observer.routes_expired(&deleted);
            }
        }
        deleted
    }

    /// Suspend until the table holds at least one route.
    pub async fn wait_until_not_empty(&self) {
        loop {
            let notified = self.not_empty.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// A copy of every cached route, ordered by destination.
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<RouteEntry> = self.routes.iter().map(|r| r.value().entry).collect();
        entries.sort_by_key(|e| e.destination);
        entries
    }

    /// Total number of routes in the table.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(&RoutingConfig::default())
    }
}
