//! The per-type handler contract.
//!
//! One handler exists per [`TypeTag`].  A handler validates, persists,
//! updates and deletes objects of its own type and nothing else; whenever an
//! activity has to touch an object of another type it goes through the
//! [`Mediator`] it is handed, never through another handler directly.

use async_trait::async_trait;

use heraut_shared::{ObjectId, ProtocolObject, TypeTag};

use crate::error::{FederationError, Result};
use crate::mediator::Mediator;

#[async_trait]
pub trait ActivityPubHandler: Send + Sync {
    /// The type this handler owns.
    fn kind(&self) -> TypeTag;

    /// Validate an inbound object. Failure rejects it before persistence.
    async fn process_incoming_request(&self, item: &ProtocolObject) -> Result<()>;

    /// Validate or post-process an outbound object after local delivery.
    async fn process_result(&self, item: &ProtocolObject) -> Result<()> {
        let _ = item;
        Ok(())
    }

    /// Apply `activity` (an object of this handler's type) to its target.
    ///
    /// Only activity handlers implement this; the target's own handler is
    /// reached with `mediator.delegate(activity, item)`.
    async fn activity(
        &self,
        mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        let _ = (mediator, item);
        Err(FederationError::InvalidItem(format!(
            "{} is not an activity type",
            activity.kind()
        )))
    }

    /// Receive `activity` whose target `item` belongs to this handler.
    async fn apply_activity(
        &self,
        mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        let _ = mediator;
        Err(FederationError::InvalidItem(format!(
            "{} cannot be applied to {} {}",
            activity.kind(),
            item.kind(),
            item.id()
        )))
    }

    async fn get_item_by_id(&self, id: &ObjectId) -> Result<ProtocolObject>;

    /// The stored version of `item`.
    async fn get_item(&self, item: &ProtocolObject) -> Result<ProtocolObject> {
        self.get_item_by_id(item.id()).await
    }

    async fn save(&self, item: &ProtocolObject) -> Result<()>;

    async fn update(&self, item: &ProtocolObject) -> Result<()>;

    /// Side effects of a stored object. Returned objects (notifications,
    /// typically) are dispatched as local objects by the caller.
    async fn event(&self, item: &ProtocolObject, source: &str) -> Result<Vec<ProtocolObject>> {
        let _ = (item, source);
        Ok(Vec::new())
    }

    async fn delete(&self, item: &ProtocolObject) -> Result<()>;
}
