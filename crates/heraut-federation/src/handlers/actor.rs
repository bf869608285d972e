//! `Person` objects, their account rows and the follow graph.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use heraut_shared::status::ATTR_LOCAL;
use heraut_shared::{AccountId, ObjectId, ProtocolObject, TypeTag};
use heraut_store::{Account, SharedDatabase};

use super::{
    flag, non_empty_str, ATTR_ACCEPTED, ATTR_INBOX, ATTR_PREFERRED_USERNAME, ATTR_UNDONE, ATTR_URL,
};
use crate::db::with_db;
use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;
use crate::mediator::Mediator;

pub struct ActorHandler {
    db: SharedDatabase,
}

impl ActorHandler {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

/// The account row described by a `Person`.
fn account_for(item: &ProtocolObject) -> Result<Account> {
    let username = non_empty_str(item, ATTR_PREFERRED_USERNAME)?;
    let local = flag(item, ATTR_LOCAL);
    let handle = match (local, host_of(item.id().as_str())) {
        (false, Some(host)) => format!("{username}@{host}"),
        _ => username.to_string(),
    };
    Ok(Account {
        id: AccountId::new(item.id().as_str()),
        handle,
        url: item
            .str_attribute(ATTR_URL)
            .unwrap_or(item.id().as_str())
            .to_string(),
        local,
        created_at: Utc::now(),
    })
}

/// `remote.example` for `https://remote.example/users/bob`.
fn host_of(uri: &str) -> Option<&str> {
    let rest = uri.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then_some(host)
}

#[async_trait]
impl ActivityPubHandler for ActorHandler {
    fn kind(&self) -> TypeTag {
        TypeTag::Person
    }

    /// A local account is only ever rewritten by a `Person` built on this
    /// instance; the local flag never survives inbound normalisation.
    async fn process_incoming_request(&self, item: &ProtocolObject) -> Result<()> {
        non_empty_str(item, ATTR_PREFERRED_USERNAME)?;
        if matches!(item.attribute(ATTR_INBOX), Some(value) if !value.is_string()) {
            return Err(FederationError::InvalidItem(format!(
                "{ATTR_INBOX} of {} must be a URL",
                item.id()
            )));
        }

        let id = AccountId::new(item.id().as_str());
        match with_db(&self.db, |db| db.find_account(&id))? {
            Some(stored) if stored.local != flag(item, ATTR_LOCAL) => Err(
                FederationError::InvalidItem(format!("{id} cannot change its locality")),
            ),
            _ => Ok(()),
        }
    }

    async fn apply_activity(
        &self,
        _mediator: &Mediator,
        activity: &ProtocolObject,
        item: &ProtocolObject,
    ) -> Result<()> {
        let actor = activity.actor().ok_or_else(|| {
            FederationError::InvalidItem(format!("{} has no actor", activity.id()))
        })?;
        let target = AccountId::new(item.id().as_str());

        match activity.kind() {
            TypeTag::Follow if flag(activity, ATTR_UNDONE) => {
                let removed = with_db(&self.db, |db| db.remove_follow(&actor, &target))?;
                debug!(follower = %actor, followee = %target, removed, "Follow undone");
                Ok(())
            }
            TypeTag::Follow => {
                let accepted = flag(activity, ATTR_ACCEPTED);
                with_db(&self.db, |db| {
                    db.add_follow(&actor, &target, Some(activity.id()))?;
                    if accepted {
                        db.mark_follow_accepted(&actor, &target)?;
                    }
                    Ok(())
                })?;
                debug!(follower = %actor, followee = %target, accepted, "Follow recorded");
                Ok(())
            }
            TypeTag::Delete => {
                if actor != target {
                    return Err(FederationError::InvalidItem(format!(
                        "{actor} cannot delete actor {target}"
                    )));
                }
                self.delete(item).await
            }
            other => Err(FederationError::InvalidItem(format!(
                "{other} cannot be applied to a Person"
            ))),
        }
    }

    async fn get_item_by_id(&self, id: &ObjectId) -> Result<ProtocolObject> {
        with_db(&self.db, |db| db.get_object(id, TypeTag::Person)).map_err(|e| e.for_item(id))
    }

    async fn save(&self, item: &ProtocolObject) -> Result<()> {
        let account = account_for(item)?;
        with_db(&self.db, |db| {
            db.in_transaction(|db| {
                db.insert_object(item)?;
                db.upsert_account(&account)
            })
        })
        .map_err(|e| e.for_item(item.id()))
    }

    async fn update(&self, item: &ProtocolObject) -> Result<()> {
        let account = account_for(item)?;
        with_db(&self.db, |db| {
            db.in_transaction(|db| {
                db.update_object(item)?;
                db.upsert_account(&account)
            })
        })
        .map_err(|e| e.for_item(item.id()))
    }

    /// Also forgets the cached remote profile, so a later lookup refetches.
    async fn delete(&self, item: &ProtocolObject) -> Result<()> {
        with_db(&self.db, |db| {
            db.delete_object(item.id(), TypeTag::Person)?;
            db.remove_cached_actor(item.id().as_str())
        })?;
        Ok(())
    }
}

/// A `Person` for an account hosted on this instance.
pub(crate) fn local_person(id: ObjectId, username: &str, url: &str, inbox: &str) -> ProtocolObject {
    ProtocolObject::new(id, TypeTag::Person)
        .with_attribute(ATTR_PREFERRED_USERNAME, username)
        .with_attribute(ATTR_URL, url)
        .with_attribute(ATTR_INBOX, inbox)
        .with_attribute(ATTR_LOCAL, Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, username: &str) -> ProtocolObject {
        ProtocolObject::new(ObjectId::from(id), TypeTag::Person)
            .with_attribute(ATTR_PREFERRED_USERNAME, username)
    }

    #[test]
    fn test_remote_handle_includes_host() {
        let account = account_for(&person("https://remote.example/users/bob", "bob")).unwrap();
        assert_eq!(account.handle, "bob@remote.example");
        assert!(!account.local);

        let local = local_person(
            ObjectId::from("https://local.example/users/alice"),
            "alice",
            "https://local.example/@alice",
            "https://local.example/users/alice/inbox",
        );
        let account = account_for(&local).unwrap();
        assert_eq!(account.handle, "alice");
        assert!(account.local);
        assert_eq!(account.url, "https://local.example/@alice");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://a.example/u/1"), Some("a.example"));
        assert_eq!(host_of("https://a.example"), Some("a.example"));
        assert_eq!(host_of("no-scheme"), None);
    }

    #[tokio::test]
    async fn test_delete_forgets_cached_profile() {
        let db = heraut_store::Database::open_in_memory().unwrap().into_shared();
        let bob = person("https://remote.example/users/bob", "bob");
        {
            let mut guard = db.lock().unwrap();
            guard
                .upsert_cached_actor("bob@remote.example", bob.id().as_str(), bob.attributes(), 1)
                .unwrap();
        }
        let handler = ActorHandler::new(db.clone());
        handler.save(&bob).await.unwrap();

        handler.delete(&bob).await.unwrap();
        handler.delete(&bob).await.unwrap();

        let guard = db.lock().unwrap();
        assert!(guard.find_cached_actor("bob@remote.example").unwrap().is_none());
        assert!(guard.find_object(bob.id(), TypeTag::Person).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_collision_leaves_no_partial_rows() {
        let db = heraut_store::Database::open_in_memory().unwrap().into_shared();
        let handler = ActorHandler::new(db.clone());
        let bob = person("https://remote.example/users/bob", "bob");
        handler.save(&bob).await.unwrap();

        let twin = person("https://remote.example/people/bob", "bob");
        assert!(matches!(
            handler.save(&twin).await,
            Err(FederationError::InvalidItem(_))
        ));

        let guard = db.lock().unwrap();
        assert!(guard.find_object(twin.id(), TypeTag::Person).unwrap().is_none());
        assert!(guard.find_account(&AccountId::new(twin.id().as_str())).unwrap().is_none());
        let owner = guard.find_account(&AccountId::new(bob.id().as_str())).unwrap().unwrap();
        assert_eq!(owner.handle, "bob@remote.example");
    }

    #[tokio::test]
    async fn test_person_without_username_is_rejected() {
        let db = heraut_store::Database::open_in_memory().unwrap().into_shared();
        let handler = ActorHandler::new(db);
        let nameless = ProtocolObject::new(ObjectId::from("https://x.example/u"), TypeTag::Person);
        assert!(matches!(
            handler.process_incoming_request(&nameless).await,
            Err(FederationError::InvalidItem(_))
        ));
    }
}
