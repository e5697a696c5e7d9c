//! Venue error types.

/// Errors that can occur while executing or settling external trades.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    #[error("no executed batch to settle")]
    NotExecuted,

    #[error("settled batch does not match executed batch")]
    BatchMismatch,

    #[error("{0}")]
    Other(String),
}
