//! Activities (`Follow`, `Like`, `Announce`, `Create`, `Undo`, `Delete`,
//! `Accept`).
//!
//! One [`ActivityHandler`] is registered per activity type.  Each stores its
//! own activities and routes them to their target through the mediator.
//! `Follow`, `Like` and `Announce` are themselves targets of `Undo` (and
//! `Follow` of `Accept`): the stored activity is updated or removed, then
//! re-delegated, flagged, to the object it originally targeted.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use heraut_shared::status::ATTR_ATTRIBUTED_TO;
use heraut_shared::{
    AccountId, ObjectId, ObjectRef, ProtocolObject, TypeTag, ATTR_ACTOR, ATTR_OBJECT,
};
use heraut_store::SharedDatabase;

use super::{target_of, ATTR_ACCEPTED, ATTR_ACCOUNT, ATTR_NOTIFICATION_TYPE, ATTR_UNDONE};
use crate::db::with_db;
use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;
use crate::mediator::Mediator;

pub struct ActivityHandler {
    kind: TypeTag,
    db: SharedDatabase,
}

impl ActivityHandler {
    /// `kind` must be an activity type.
    pub fn new(kind: TypeTag, db: SharedDatabase) -> Self {
        debug_assert!(kind.is_activity(), "{kind} is not an activity type");
        Self { kind, db }
    }

    /// The local account to notify about `item`, if any.
    fn notification_recipient(
        &self,
        item: &ProtocolObject,
    ) -> Result<Option<(AccountId, &'static str)>> {
        let target = target_of(item)?;
        let (recipient, kind) = match self.kind {
            TypeTag::Follow => (AccountId::new(target.id().as_str()), "follow"),
            TypeTag::Like | TypeTag::Announce => {
                let note = with_db(&self.db, |db| db.find_object(target.id(), TypeTag::Note))?;
                let author = note
                    .as_ref()
                    .and_then(|note| note.str_attribute(ATTR_ATTRIBUTED_TO))
                    .or_else(|| target.str_attribute(ATTR_ATTRIBUTED_TO));
                let Some(author) = author else {
                    return Ok(None);
                };
                let kind = if self.kind == TypeTag::Like {
                    "favourite"
                } else {
                    "reblog"
                };
                (AccountId::new(author), kind)
            }
            _ => return Ok(None),
        };

        if item.actor().as_ref() == Some(&recipient) {
            return Ok(None);
        }
        let local = with_db(&self.db, |db| db.is_local_account(&recipient))?;
        Ok(local.then_some((recipient, kind)))
    }
}

#[async_trait]
impl ActivityPubHandler for ActivityHandler {
    fn kind(&self) -> TypeTag {
        self.kind
    }

    async fn process_incoming_request(&self, item: &ProtocolObject) -> Result<()> {
        if self.kind == TypeTag::Create && !matches!(item.target()?, Some(ObjectRef::Embedded(_))) {
            return Err(FederationError::InvalidItem(format!(
                "Create {} must embed the created object",
                item.id()
            )));
        }
        Ok(())
    }

    async fn process_result(&self, item: &ProtocolObject) -> Result<()> {
        self.process_incoming_request(item).await?;
        let acknowledged = with_db(&self.db, |db| db.count_acknowledged_deliveries(item.id()))?;
        debug!(id = %item.id(), kind = %self.kind, acknowledged, "Outbound activity recorded");
        Ok(())
    }

    async fn activity(
        &self,
        mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        mediator.delegate(activity, item).await
    }

    async fn apply_activity(
        &self,
        mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        let stored = match self.get_item(item).await {
            Ok(stored) => Some(stored),
            Err(FederationError::ItemNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let current = stored.clone().unwrap_or_else(|| item.clone());

        match (activity.kind(), self.kind) {
            (TypeTag::Undo, TypeTag::Follow | TypeTag::Like | TypeTag::Announce) => {
                if activity.actor() != current.actor() {
                    return Err(FederationError::InvalidItem(format!(
                        "{} may only be undone by its actor",
                        current.id()
                    )));
                }
                if stored.is_some() {
                    self.delete(&current).await?;
                }
                let target = target_of(&current)?;
                let undone = current.with_attribute(ATTR_UNDONE, Value::Bool(true));
                mediator.delegate(&undone, &target).await
            }
            (TypeTag::Accept, TypeTag::Follow) => {
                let target = target_of(&current)?;
                let actor = activity.actor().map(|actor| actor.to_object_id());
                if actor.as_ref() != Some(target.id()) {
                    return Err(FederationError::InvalidItem(format!(
                        "{} may only be accepted by {}",
                        current.id(),
                        target.id()
                    )));
                }
                let accepted = current.with_attribute(ATTR_ACCEPTED, Value::Bool(true));
                if stored.is_some() {
                    self.update(&accepted).await?;
                }
                mediator.delegate(&accepted, &target).await
            }
            (other, own) => Err(FederationError::InvalidItem(format!(
                "{other} cannot be applied to {own} {}",
                item.id()
            ))),
        }
    }

    async fn get_item_by_id(&self, id: &ObjectId) -> Result<ProtocolObject> {
        with_db(&self.db, |db| db.get_object(id, self.kind)).map_err(|e| e.for_item(id))
    }

    async fn save(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.insert_object(item)).map_err(|e| e.for_item(item.id()))
    }

    async fn update(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.update_object(item)).map_err(|e| e.for_item(item.id()))
    }

    /// Emits a notification for the local account a follow or reaction is
    /// aimed at. The notification identity derives from the activity, so a
    /// re-delivered activity never notifies twice.
    async fn event(&self, item: &ProtocolObject, source: &str) -> Result<Vec<ProtocolObject>> {
        let recipient = match self.notification_recipient(item) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(id = %item.id(), error = %e, "Could not determine notification recipient");
                None
            }
        };
        let Some((recipient, notification_type)) = recipient else {
            return Ok(Vec::new());
        };
        let Some(actor) = item.actor() else {
            return Ok(Vec::new());
        };

        debug!(id = %item.id(), source, recipient = %recipient, notification_type, "Notifying");
        let notification = ProtocolObject::new(
            ObjectId::new(format!("{}#notification", item.id())),
            TypeTag::Notification,
        )
        .with_attribute(ATTR_ACCOUNT, recipient.as_str())
        .with_attribute(ATTR_ACTOR, actor.as_str())
        .with_attribute(ATTR_OBJECT, item.id().as_str())
        .with_attribute(ATTR_NOTIFICATION_TYPE, notification_type);
        Ok(vec![notification])
    }

    async fn delete(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.delete_object(item.id(), self.kind))?;
        Ok(())
    }
}
