use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// `InvalidArgument`, `DuplicateKey` and `Serialization` are precondition
/// violations and propagate to the caller. `InvalidStateTrigger` and
/// `NotFound` are recovered locally on the event/command path: see
/// `engine::ExecutionEngine::handle_event`, which catches, logs and drops
/// them rather than propagating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("invalid state trigger: cannot apply {event} to order in state {from}")]
    InvalidStateTrigger { from: String, event: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no handler registered for timer {0}")]
    NoHandler(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Precondition helper: fails fast with `InvalidArgument` and a description
/// rather than panicking.
pub fn require(condition: bool, description: impl Into<String>) -> EngineResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(description.into()))
    }
}
