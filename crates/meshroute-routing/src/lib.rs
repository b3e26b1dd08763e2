//! Meshroute Routing: on-demand route discovery for multi-hop radio meshes.
//!
//! This crate provides:
//! - [`RouteTable`]: cached routes with two-phase aging, backed by DashMap.
//! - [`RequestTable`]: outstanding discoveries with timed expiry.
//! - [`RequestTableCleaner`]: background task sweeping expired requests.
//! - [`RoutingPolicyManager`]: the node's routing policy and its sleep interplay.
//! - [`RoutingManager`]: discovery, the RREQ/RREP/RERR receive path and listeners.
//! - [`sim`]: an in-memory radio medium implementing [`LinkLayer`].

pub mod cleaner;
pub mod client;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod policy;
pub mod request;
pub mod route_table;
pub mod sim;

// Re-exports for convenience.
pub use cleaner::RequestTableCleaner;
pub use client::{ChannelClient, CorrelationToken, OneshotClient, RouteEventClient, RouteOutcome};
pub use error::{DiscoveryError, LinkError, NoRouteError, RoutingError};
pub use events::{EventRecorder, ListenerId, RoutingEvent, RoutingEventListener, TracingListener};
pub use link::LinkLayer;
pub use manager::RoutingManager;
pub use policy::{RoutingPolicyManager, SleepFlag, SleepManager};
pub use request::{InsertResult, RequestEntry, RequestKey, RequestTable};
pub use route_table::{RouteEntry, RouteObserver, RouteTable, RouteUpdate};
pub use sim::{InboundFrame, SimulatedMedium, SimulatedRadio};
