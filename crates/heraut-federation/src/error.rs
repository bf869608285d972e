use std::time::Duration;

use thiserror::Error;

use heraut_shared::{ModelError, ObjectId, TypeTag};
use heraut_store::StoreError;

use crate::registry::RegistryError;

/// Errors surfaced by dispatch, handlers, the actor cache and delivery.
#[derive(Error, Debug)]
pub enum FederationError {
    /// The payload is unacceptable for its type. Rejected, never retried.
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Item not found: {0}")]
    ItemNotFound(ObjectId),

    #[error("Item already exists: {0}")]
    ItemAlreadyExists(ObjectId),

    /// The actor could not be fetched and nothing was cached for it.
    #[error("Actor {identifier} could not be resolved: {reason}")]
    ActorUnresolvable { identifier: String, reason: String },

    /// No handler is registered for the type (a configuration error).
    #[error("No handler registered for type {0}")]
    UnknownType(TypeTag),

    #[error("Handler registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A network call exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A remote server could not be reached or answered with an error.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl FederationError {
    /// Whether the same call may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Attach an identity to store-level "missing" / "duplicate" errors.
    pub(crate) fn for_item(self, id: &ObjectId) -> Self {
        match self {
            Self::Store(StoreError::NotFound) => Self::ItemNotFound(id.clone()),
            Self::Store(StoreError::AlreadyExists) => Self::ItemAlreadyExists(id.clone()),
            Self::Store(StoreError::HandleTaken(handle)) => {
                Self::InvalidItem(format!("{id} claims handle {handle}, already in use"))
            }
            other => other,
        }
    }
}

impl From<ModelError> for FederationError {
    fn from(err: ModelError) -> Self {
        Self::InvalidItem(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FederationError>;
