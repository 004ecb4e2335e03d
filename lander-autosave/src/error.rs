use lander_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;
use crate::gateway::GatewayError;

/// Errors surfaced by the versioning and auto-save engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Persisting the draft failed. Retried on the next tick.
    #[error("Save failed: {0}")]
    SaveFailure(String),
    #[error("Cannot save while offline")]
    OfflineRejection,
    /// Local and remote drafts diverged and nobody picked a strategy yet.
    #[error("Unresolved conflict {0} blocks saving")]
    ConflictUnresolved(Uuid),
    #[error("Conflict {0} is not active")]
    ConflictNotFound(Uuid),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
