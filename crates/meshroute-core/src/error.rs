use crate::state_machine::DestinationState;

/// Core protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid destination state transition from {from} to {to}")]
    InvalidStateTransition {
        from: DestinationState,
        to: DestinationState,
    },

    #[error("invalid radio address: {0}")]
    InvalidAddress(String),

    #[error("unknown routing policy: {0}")]
    UnknownPolicy(String),

    #[error("frame too short for {kind}: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown AODV message type: {0:#04x}")]
    UnknownMessageType(u8),
}
