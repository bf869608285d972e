//! Type-tag → handler table, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use heraut_shared::{ObjectId, ProtocolObject, TypeTag};

use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A handler for {0} is already registered")]
    DuplicateHandler(TypeTag),

    #[error("No handler registered for {0}")]
    MissingHandler(TypeTag),
}

/// Exactly one handler per type tag. Immutable once built.
pub struct HandlerRegistry {
    handlers: BTreeMap<TypeTag, Arc<dyn ActivityPubHandler>>,
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: BTreeMap<TypeTag, Arc<dyn ActivityPubHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(
        &mut self,
        handler: Arc<dyn ActivityPubHandler>,
    ) -> std::result::Result<&mut Self, RegistryError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    /// Fails unless every type tag has a handler.
    pub fn build(self) -> std::result::Result<HandlerRegistry, RegistryError> {
        if let Some(missing) = TypeTag::ALL
            .iter()
            .find(|kind| !self.handlers.contains_key(*kind))
        {
            return Err(RegistryError::MissingHandler(*missing));
        }
        info!(handlers = self.handlers.len(), "Handler registry built");
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn handler_for(&self, kind: TypeTag) -> Result<&Arc<dyn ActivityPubHandler>> {
        self.handlers
            .get(&kind)
            .ok_or(FederationError::UnknownType(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.handlers.keys().copied()
    }

    /// Look `id` up with each candidate type's handler, in order, and return
    /// the first stored match.
    pub async fn locate(
        &self,
        id: &ObjectId,
        candidates: &[TypeTag],
    ) -> Result<Option<ProtocolObject>> {
        for kind in candidates {
            match self.handler_for(*kind)?.get_item_by_id(id).await {
                Ok(found) => return Ok(Some(found)),
                Err(FederationError::ItemNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
