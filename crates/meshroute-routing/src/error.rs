use meshroute_core::{Address, CoreError};

/// Errors that can occur within the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid route string {input:?}: {reason}")]
    InvalidRouteString { input: String, reason: String },

    #[error("invalid route entry: {reason}")]
    InvalidRouteEntry { reason: String },

    #[error("routing manager already initialized for {0}")]
    AlreadyInitialized(Address),

    #[error("routing manager has not been initialized")]
    NotInitialized,

    #[error("routing manager was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Failures reported by a link layer when a frame cannot be sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("no acknowledgement from {0}")]
    NoAck(Address),

    #[error("channel busy")]
    ChannelBusy,

    #[error("radio is off")]
    RadioOff,
}

/// Returned synchronously by `find_route` when discovery cannot be attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoRouteError {
    #[error("routing manager has not been initialized")]
    NotInitialized,

    #[error("routing manager has not been started")]
    NotStarted,

    #[error("routing manager is stopped")]
    Stopped,

    #[error("radio unavailable: {0}")]
    RadioUnavailable(#[from] LinkError),

    #[error("cannot discover a route to our own address {0}")]
    SelfDiscovery(Address),
}

/// Asynchronous discovery failures, delivered to waiting clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("route discovery for {destination} timed out")]
    Timeout { destination: Address },

    #[error("route error reported for {destination}")]
    RouteError { destination: Address },

    #[error("route request for {destination} could not be sent: {source}")]
    Link {
        destination: Address,
        source: LinkError,
    },

    #[error("routing manager stopped")]
    Stopped,
}
