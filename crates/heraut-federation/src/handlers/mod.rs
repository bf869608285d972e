//! The handlers shipped with the engine, one per type tag.

mod activity;
mod actor;
mod note;
mod notification;

use std::sync::Arc;

use serde_json::Value;

use heraut_shared::{ObjectRef, ProtocolObject, TypeTag};
use heraut_store::SharedDatabase;

use crate::error::{FederationError, Result};
use crate::registry::{HandlerRegistry, RegistryError};

pub use activity::ActivityHandler;
pub use actor::ActorHandler;
pub(crate) use actor::local_person;
pub use note::NoteHandler;
pub use notification::NotificationHandler;

/// Set on an activity re-delegated to its target after being undone.
pub const ATTR_UNDONE: &str = "heraut:undone";
/// Set on a `Follow` once the followee accepted it.
pub const ATTR_ACCEPTED: &str = "heraut:accepted";

pub const ATTR_PREFERRED_USERNAME: &str = "preferredUsername";
pub const ATTR_INBOX: &str = "inbox";
pub const ATTR_URL: &str = "url";

/// Recipient account of a notification.
pub const ATTR_ACCOUNT: &str = "account";
pub const ATTR_NOTIFICATION_TYPE: &str = "notificationType";

/// A registry with every built-in handler, all backed by `db`.
pub fn standard_registry(
    db: &SharedDatabase,
) -> std::result::Result<HandlerRegistry, RegistryError> {
    let mut builder = HandlerRegistry::builder();
    builder
        .register(Arc::new(ActorHandler::new(Arc::clone(db))))?
        .register(Arc::new(NoteHandler::new(Arc::clone(db))))?
        .register(Arc::new(NotificationHandler::new(Arc::clone(db))))?;
    for kind in TypeTag::ALL.into_iter().filter(TypeTag::is_activity) {
        builder.register(Arc::new(ActivityHandler::new(kind, Arc::clone(db))))?;
    }
    builder.build()
}

pub(crate) fn flag(item: &ProtocolObject, key: &str) -> bool {
    item.attribute(key).and_then(Value::as_bool).unwrap_or(false)
}

/// The target of a stored activity as an object: the embedded copy, or a
/// reference stub typed with the activity's first candidate type.
pub(crate) fn target_of(activity: &ProtocolObject) -> Result<ProtocolObject> {
    match activity.target()? {
        Some(ObjectRef::Embedded(object)) => Ok(*object),
        Some(ObjectRef::Reference(id)) => {
            let kind = activity.kind().target_candidates().first().copied().ok_or_else(|| {
                FederationError::InvalidItem(format!("{} has no target type", activity.kind()))
            })?;
            Ok(ProtocolObject::reference(id, kind))
        }
        None => Err(FederationError::InvalidItem(format!(
            "{} {} has no object",
            activity.kind(),
            activity.id()
        ))),
    }
}

pub(crate) fn non_empty_str<'a>(item: &'a ProtocolObject, key: &'static str) -> Result<&'a str> {
    item.str_attribute(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            FederationError::InvalidItem(format!("{} {} lacks {key}", item.kind(), item.id()))
        })
}
