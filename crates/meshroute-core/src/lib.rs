pub mod config;
pub mod error;
pub mod messages;
pub mod state_machine;
pub mod types;

pub use config::RoutingConfig;
pub use error::CoreError;
pub use messages::{AodvMessage, RouteErrorMessage, RouteReply, RouteRequest};
pub use state_machine::{DestinationEvent, DestinationState, DestinationStateMachine};
pub use types::{Address, RoutingPolicy};
