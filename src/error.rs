//! Error types for the cache and the persistence gateway.

use std::sync::Arc;

use thiserror::Error;

/// Failure reported by a persistence gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The store has no record with this id.
    #[error("entity '{0}' does not exist in the store")]
    NotFound(String),

    /// No default entity has ever been configured.
    #[error("no default entity configured")]
    NoDefault,

    /// The store refused the write (validation, permissions, ...).
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Transport or storage failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Error surfaced to callers of the store.
///
/// Cloneable so a single failed load or initialization can be handed to
/// every caller awaiting it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("entity '{0}' not found")]
    EntityNotFound(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] Arc<GatewayError>),

    #[error("default entity requested before initialization")]
    UninitializedDefault,
}

impl CacheError {
    /// Check if this error means the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_))
    }
}

impl From<GatewayError> for CacheError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(id) => Self::EntityNotFound(id),
            other => Self::PersistenceFailure(Arc::new(other)),
        }
    }
}
