use async_trait::async_trait;
use meshroute_core::{Address, RouteErrorMessage, RouteReply, RouteRequest};

use crate::error::LinkError;

/// The radio link the routing engine sends its control messages through.
///
/// Implementations bridge to a concrete link layer (a real radio, or the
/// in-memory medium in [`crate::sim`]). Received frames are handed back to
/// the engine with `RoutingManager::handle_message`.
#[async_trait]
pub trait LinkLayer: Send + Sync {
    /// Whether the radio can transmit right now.
    fn is_available(&self) -> bool;

    /// Broadcast a route request to every neighbor.
    async fn send_request(&self, request: &RouteRequest) -> Result<(), LinkError>;

    /// Unicast a route reply to `next_hop`; `Address::BROADCAST` broadcasts it.
    async fn send_reply(&self, next_hop: Address, reply: &RouteReply) -> Result<(), LinkError>;

    /// Unicast a route error to `next_hop`.
    async fn send_error(&self, next_hop: Address, error: &RouteErrorMessage) -> Result<(), LinkError>;
}
