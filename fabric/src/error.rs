use thiserror::Error;

/// Crate-wide error type.
///
/// Transport and parse faults are swallowed at the layer that produces them
/// (discovery, gossip) per the error-handling design; this type exists for
/// the paths that do need to surface a failure to a caller (orchestrator,
/// HTTP handlers).
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("retry limit reached")]
    RetryExhausted,

    #[error("message destined for another node")]
    WrongDestination,

    #[error("unsupported message type: {0}")]
    UnsupportedType(String),
}

pub type Result<T> = std::result::Result<T, FabricError>;
