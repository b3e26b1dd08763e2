use std::fmt;

use crate::error::CoreError;

/// The routing state of a single destination, as seen by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DestinationState {
    /// Nothing known about the destination.
    NoRoute,
    /// A route discovery is outstanding.
    Discovering,
    /// A route is installed in the route table.
    Routed,
    /// The last discovery failed or timed out.
    Unreachable,
}

impl DestinationState {
    /// Whether a packet can be sent to the destination right now.
    pub fn has_route(&self) -> bool {
        matches!(self, Self::Routed)
    }
}

impl fmt::Display for DestinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoute => write!(f, "NoRoute"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Routed => write!(f, "Routed"),
            Self::Unreachable => write!(f, "Unreachable"),
        }
    }
}

/// Events that move a destination between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationEvent {
    /// A route request was emitted for the destination.
    DiscoveryStarted,
    /// The pending discovery resolved with a route.
    RouteFound,
    /// The pending discovery timed out or was answered with an error.
    DiscoveryFailed,
    /// The installed route was torn down.
    RouteInvalidated,
    /// A route was learned from overheard RREQ/RREP traffic.
    RouteLearned,
}

/// Destination state transitions.
///
/// Valid transitions:
/// - NoRoute | Unreachable | Routed → Discovering (DiscoveryStarted)
/// - Discovering → Routed (RouteFound)
/// - Discovering → Unreachable (DiscoveryFailed)
/// - Routed → NoRoute (RouteInvalidated)
/// - Unreachable → NoRoute (RouteInvalidated)
/// - any → Routed (RouteLearned)
pub struct DestinationStateMachine;

impl DestinationStateMachine {
    /// Attempt a state transition based on an event.
    pub fn transition(
        current: DestinationState,
        event: DestinationEvent,
    ) -> Result<DestinationState, CoreError> {
        use DestinationEvent as E;
        use DestinationState as S;

        let new_state = match (current, event) {
            (S::NoRoute, E::DiscoveryStarted) => S::Discovering,
            (S::Unreachable, E::DiscoveryStarted) => S::Discovering,
            // The cached route aged out before it was used again.
            (S::Routed, E::DiscoveryStarted) => S::Discovering,

            (S::Discovering, E::RouteFound) => S::Routed,
            (S::Discovering, E::DiscoveryFailed) => S::Unreachable,

            (S::Routed, E::RouteInvalidated) => S::NoRoute,
            (S::Unreachable, E::RouteInvalidated) => S::NoRoute,

            (_, E::RouteLearned) => S::Routed,

            _ => {
                let target = match event {
                    E::DiscoveryStarted => S::Discovering,
                    E::RouteFound | E::RouteLearned => S::Routed,
                    E::DiscoveryFailed => S::Unreachable,
                    E::RouteInvalidated => S::NoRoute,
                };
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    to: target,
                });
            }
        };

        tracing::trace!(
            from = %current,
            to = %new_state,
            event = ?event,
            "destination state transition"
        );

        Ok(new_state)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: DestinationState, event: DestinationEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
