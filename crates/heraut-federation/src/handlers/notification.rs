//! Per-account notifications.
//!
//! Notifications are derived locally from other activities.  One without an
//! identity is discarded silently instead of being stored.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use heraut_shared::{AccountId, ObjectId, ProtocolObject, TypeTag};
use heraut_store::SharedDatabase;

use super::{non_empty_str, ATTR_ACCOUNT, ATTR_NOTIFICATION_TYPE};
use crate::db::with_db;
use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;

pub struct NotificationHandler {
    db: SharedDatabase,
}

impl NotificationHandler {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActivityPubHandler for NotificationHandler {
    fn kind(&self) -> TypeTag {
        TypeTag::Notification
    }

    async fn process_incoming_request(&self, item: &ProtocolObject) -> Result<()> {
        non_empty_str(item, ATTR_ACCOUNT)?;
        non_empty_str(item, ATTR_NOTIFICATION_TYPE)?;
        Ok(())
    }

    async fn get_item_by_id(&self, id: &ObjectId) -> Result<ProtocolObject> {
        with_db(&self.db, |db| db.find_notification(id))?
            .ok_or_else(|| FederationError::ItemNotFound(id.clone()))
    }

    /// Stores the notification stamped with the current time.
    async fn save(&self, item: &ProtocolObject) -> Result<()> {
        if item.id().is_empty() {
            debug!("Discarding notification without identity");
            return Ok(());
        }
        let recipient = AccountId::new(non_empty_str(item, ATTR_ACCOUNT)?);
        let stamped = item.clone().with_published(Utc::now());
        with_db(&self.db, |db| db.insert_notification(&recipient, &stamped))
            .map_err(|e| e.for_item(item.id()))
    }

    /// Replaces the payload, keeping the original timestamp.
    async fn update(&self, item: &ProtocolObject) -> Result<()> {
        let stored = self.get_item(item).await?;
        let merged = item.clone().with_published(stored.published());
        with_db(&self.db, |db| db.update_notification(&merged)).map_err(|e| e.for_item(item.id()))
    }

    async fn delete(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.delete_notification(item.id()))?;
        Ok(())
    }
}
