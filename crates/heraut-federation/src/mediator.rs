//! Cross-type routing for activities.
//!
//! Handlers receive a [`Mediator`] instead of the registry.  Its only
//! operation is [`Mediator::delegate`], which looks up the handler owning the
//! target's type and calls its `apply_activity`.  The mediator takes the
//! identity lock of the target unless an outer step of the same dispatch
//! already holds it, and refuses chains deeper than
//! [`MAX_MEDIATION_DEPTH`].

use std::sync::Arc;

use tracing::debug;

use heraut_shared::constants::MAX_MEDIATION_DEPTH;
use heraut_shared::{ObjectId, ProtocolObject};

use crate::error::{FederationError, Result};
use crate::locks::KeyedLocks;
use crate::registry::HandlerRegistry;

pub struct Mediator {
    registry: Arc<HandlerRegistry>,
    locks: Arc<KeyedLocks>,
    held: Vec<ObjectId>,
    depth: usize,
}

impl Mediator {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        locks: Arc<KeyedLocks>,
        held: Vec<ObjectId>,
    ) -> Self {
        Self {
            registry,
            locks,
            held,
            depth: 0,
        }
    }

    /// How many delegations led to this mediator.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Hand `activity` to the handler owning `item`'s type.
    pub async fn delegate(&self, activity: &ProtocolObject, item: &ProtocolObject) -> Result<()> {
        if self.depth >= MAX_MEDIATION_DEPTH {
            return Err(FederationError::InvalidItem(format!(
                "activity {} nests deeper than {MAX_MEDIATION_DEPTH} delegations",
                activity.id()
            )));
        }

        let handler = self.registry.handler_for(item.kind())?;

        let _guard = if item.id().is_empty() || self.held.contains(item.id()) {
            None
        } else {
            Some(self.locks.lock(item.id()).await)
        };

        let mut held = self.held.clone();
        held.push(item.id().clone());
        let child = Mediator {
            registry: Arc::clone(&self.registry),
            locks: Arc::clone(&self.locks),
            held,
            depth: self.depth + 1,
        };

        debug!(
            activity = %activity.id(),
            activity_type = %activity.kind(),
            target = %item.id(),
            target_type = %item.kind(),
            depth = child.depth,
            "Delegating activity"
        );
        handler.apply_activity(&child, activity, item).await
    }
}
