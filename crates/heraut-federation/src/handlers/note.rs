//! `Note` objects (posts) and the reactions attached to them.

use async_trait::async_trait;
use tracing::debug;

use heraut_shared::status::{ATTR_ATTRIBUTED_TO, ATTR_CONTENT, ATTR_LOCAL};
use heraut_shared::{ObjectId, ProtocolObject, TypeTag};
use heraut_store::SharedDatabase;

use super::{flag, non_empty_str, ATTR_UNDONE};
use crate::db::with_db;
use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;
use crate::mediator::Mediator;

pub struct NoteHandler {
    db: SharedDatabase,
}

impl NoteHandler {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    fn check_author(activity: &ProtocolObject, note: &ProtocolObject) -> Result<()> {
        let author = non_empty_str(note, ATTR_ATTRIBUTED_TO)?;
        match activity.actor() {
            Some(actor) if actor.as_str() == author => Ok(()),
            _ => Err(FederationError::InvalidItem(format!(
                "{} {} is not by the author of {}",
                activity.kind(),
                activity.id(),
                note.id()
            ))),
        }
    }
}

#[async_trait]
impl ActivityPubHandler for NoteHandler {
    fn kind(&self) -> TypeTag {
        TypeTag::Note
    }

    async fn process_incoming_request(&self, item: &ProtocolObject) -> Result<()> {
        non_empty_str(item, ATTR_ATTRIBUTED_TO)?;
        if matches!(item.attribute(ATTR_CONTENT), Some(value) if !value.is_string()) {
            return Err(FederationError::InvalidItem(format!(
                "{ATTR_CONTENT} of {} must be text",
                item.id()
            )));
        }

        // A known note keeps its author and its locality.
        let stored = with_db(&self.db, |db| db.find_object(item.id(), TypeTag::Note))?;
        let Some(stored) = stored else {
            return Ok(());
        };
        if stored.str_attribute(ATTR_ATTRIBUTED_TO) != item.str_attribute(ATTR_ATTRIBUTED_TO) {
            return Err(FederationError::InvalidItem(format!(
                "{} cannot change author",
                item.id()
            )));
        }
        if flag(&stored, ATTR_LOCAL) != flag(item, ATTR_LOCAL) {
            return Err(FederationError::InvalidItem(format!(
                "{} cannot change locality",
                item.id()
            )));
        }
        Ok(())
    }

    async fn apply_activity(
        &self,
        _mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        match activity.kind() {
            TypeTag::Create => {
                Self::check_author(activity, item)?;
                self.process_incoming_request(item).await?;
                match self.save(item).await {
                    Ok(()) | Err(FederationError::ItemAlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            kind @ (TypeTag::Like | TypeTag::Announce) => {
                let actor = activity.actor().ok_or_else(|| {
                    FederationError::InvalidItem(format!("{} has no actor", activity.id()))
                })?;
                if flag(activity, ATTR_UNDONE) {
                    let removed = with_db(&self.db, |db| {
                        db.remove_reaction(item.id(), &actor, kind.as_str())
                    })?;
                    debug!(
                        note = %item.id(),
                        actor = %actor,
                        kind = %kind,
                        removed,
                        "Reaction undone"
                    );
                } else {
                    with_db(&self.db, |db| {
                        db.add_reaction(item.id(), &actor, kind.as_str(), activity.id())
                    })?;
                    debug!(note = %item.id(), actor = %actor, kind = %kind, "Reaction recorded");
                }
                Ok(())
            }
            TypeTag::Delete => {
                let stored = self.get_item(item).await?;
                Self::check_author(activity, &stored)?;
                self.delete(&stored).await
            }
            other => Err(FederationError::InvalidItem(format!(
                "{other} cannot be applied to a Note"
            ))),
        }
    }

    async fn get_item_by_id(&self, id: &ObjectId) -> Result<ProtocolObject> {
        with_db(&self.db, |db| db.get_object(id, TypeTag::Note)).map_err(|e| e.for_item(id))
    }

    async fn save(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.insert_object(item)).map_err(|e| e.for_item(item.id()))
    }

    async fn update(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| db.update_object(item)).map_err(|e| e.for_item(item.id()))
    }

    async fn delete(&self, item: &ProtocolObject) -> Result<()> {
        let (deleted, reactions, homes) = with_db(&self.db, |db| {
            Ok((
                db.delete_object(item.id(), TypeTag::Note)?,
                db.clear_reactions(item.id())?,
                db.remove_from_homes(item.id())?,
            ))
        })?;
        debug!(note = %item.id(), deleted, reactions, homes, "Note deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use heraut_store::Database;

    use super::*;

    #[tokio::test]
    async fn test_note_requires_author() {
        let handler = NoteHandler::new(Database::open_in_memory().unwrap().into_shared());
        let orphan = ProtocolObject::new(ObjectId::from("n1"), TypeTag::Note)
            .with_attribute(ATTR_CONTENT, "hello");
        assert!(matches!(
            handler.process_incoming_request(&orphan).await,
            Err(FederationError::InvalidItem(_))
        ));

        let numeric = orphan
            .with_attribute(ATTR_ATTRIBUTED_TO, "https://x.example/u/a")
            .with_attribute(ATTR_CONTENT, 42);
        assert!(handler.process_incoming_request(&numeric).await.is_err());
    }

    #[tokio::test]
    async fn test_known_note_keeps_its_author() {
        let handler = NoteHandler::new(Database::open_in_memory().unwrap().into_shared());
        let original = ProtocolObject::new(ObjectId::from("n1"), TypeTag::Note)
            .with_attribute(ATTR_ATTRIBUTED_TO, "https://local.example/users/alice")
            .with_attribute(ATTR_CONTENT, "mine")
            .with_attribute(ATTR_LOCAL, true);
        handler.save(&original).await.unwrap();

        let hijack = ProtocolObject::new(ObjectId::from("n1"), TypeTag::Note)
            .with_attribute(ATTR_ATTRIBUTED_TO, "https://evil.example/users/mallory")
            .with_attribute(ATTR_CONTENT, "not yours");
        assert!(matches!(
            handler.process_incoming_request(&hijack).await,
            Err(FederationError::InvalidItem(_))
        ));

        let delocalised = original.clone().without_attribute(ATTR_LOCAL);
        assert!(handler.process_incoming_request(&delocalised).await.is_err());

        let edited = original.with_attribute(ATTR_CONTENT, "edited");
        handler.process_incoming_request(&edited).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_clears_reactions() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let handler = NoteHandler::new(db.clone());
        let note = ProtocolObject::new(ObjectId::from("n1"), TypeTag::Note)
            .with_attribute(ATTR_ATTRIBUTED_TO, "https://x.example/u/a");
        handler.save(&note).await.unwrap();
        db.lock()
            .unwrap()
            .add_reaction(note.id(), &"b".into(), "Like", &ObjectId::from("l1"))
            .unwrap();

        handler.delete(&note).await.unwrap();
        assert!(matches!(
            handler.get_item_by_id(note.id()).await,
            Err(FederationError::ItemNotFound(_))
        ));
        assert!(db.lock().unwrap().list_reactions(note.id()).unwrap().is_empty());
    }
}
