//! The generic protocol object envelope.
//!
//! Every item exchanged with a remote server (actors, notes, activities,
//! notifications) is carried as a [`ProtocolObject`]: an identity, a type tag,
//! a publication timestamp, an optional context reference and the ordered
//! attribute map received on the wire.  Objects are values: every
//! modification returns a new object, and identity and type never change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::types::{AccountId, ObjectId, TypeTag};

/// Ordered key/value attributes of a protocol object.
pub type Attributes = serde_json::Map<String, Value>;

const KEY_ID: &str = "id";
const KEY_TYPE: &str = "type";
const KEY_PUBLISHED: &str = "published";
const KEY_CONTEXT: &str = "context";

/// Attribute naming the acting account of an activity.
pub const ATTR_ACTOR: &str = "actor";
/// Attribute naming the target of an activity.
pub const ATTR_OBJECT: &str = "object";
/// Prefix of attributes only this instance may set. They are stripped from
/// anything received from a remote server.
pub const LOCAL_ATTR_PREFIX: &str = "heraut:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Attributes", into = "Attributes")]
pub struct ProtocolObject {
    id: ObjectId,
    kind: TypeTag,
    attributes: Attributes,
    published: DateTime<Utc>,
    context: Option<ObjectId>,
}

/// Target of an activity: either an identifier or the full object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    Reference(ObjectId),
    Embedded(Box<ProtocolObject>),
}

impl ObjectRef {
    pub fn id(&self) -> &ObjectId {
        match self {
            ObjectRef::Reference(id) => id,
            ObjectRef::Embedded(object) => object.id(),
        }
    }
}

impl ProtocolObject {
    /// A new object with no attributes, published now.
    pub fn new(id: ObjectId, kind: TypeTag) -> Self {
        Self {
            id,
            kind,
            attributes: Attributes::new(),
            published: Utc::now(),
            context: None,
        }
    }

    /// A reference stub: the identity and type of an object known only by id.
    pub fn reference(id: ObjectId, kind: TypeTag) -> Self {
        Self::new(id, kind)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.attributes.insert(key, value.into());
        }
        self
    }

    pub fn without_attribute(mut self, key: &str) -> Self {
        self.attributes.shift_remove(key);
        self
    }

    /// This object with every instance-local attribute removed, embedded
    /// objects included.
    pub fn without_local_attributes(mut self) -> Self {
        self.attributes.retain(|key, _| !key.starts_with(LOCAL_ATTR_PREFIX));
        self.attributes.values_mut().for_each(strip_local_attributes);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = published;
        self
    }

    pub fn with_context(mut self, context: ObjectId) -> Self {
        self.context = Some(context);
        self
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn kind(&self) -> TypeTag {
        self.kind
    }

    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    pub fn context(&self) -> Option<&ObjectId> {
        self.context.as_ref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// The account performing this activity, if declared.
    pub fn actor(&self) -> Option<AccountId> {
        self.str_attribute(ATTR_ACTOR)
            .filter(|s| !s.trim().is_empty())
            .map(AccountId::new)
    }

    /// The target of this activity, if declared.
    pub fn target(&self) -> Result<Option<ObjectRef>, ModelError> {
        match self.attributes.get(ATTR_OBJECT) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) if !id.trim().is_empty() => {
                Ok(Some(ObjectRef::Reference(ObjectId::new(id.clone()))))
            }
            Some(Value::Object(map)) => {
                let embedded = ProtocolObject::from_map(map.clone())?;
                Ok(Some(ObjectRef::Embedded(Box::new(embedded))))
            }
            Some(_) => Err(ModelError::InvalidField {
                field: ATTR_OBJECT,
                reason: "expected an identifier or an embedded object".to_string(),
            }),
        }
    }

    /// Structural representation: `id`, `type`, `published`, optional
    /// `context`, followed by every attribute in its original order.
    pub fn to_map(&self) -> Attributes {
        let mut map = Attributes::new();
        map.insert(KEY_ID.to_string(), Value::String(self.id.0.clone()));
        map.insert(
            KEY_TYPE.to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        map.insert(
            KEY_PUBLISHED.to_string(),
            Value::String(self.published.to_rfc3339()),
        );
        if let Some(context) = &self.context {
            map.insert(KEY_CONTEXT.to_string(), Value::String(context.0.clone()));
        }
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// Parse the structural representation produced by [`Self::to_map`] or
    /// received from a remote server.
    ///
    /// Only notifications may arrive without an identity; they are dropped
    /// later instead of being persisted.
    pub fn from_map(mut map: Attributes) -> Result<Self, ModelError> {
        let kind = match map.shift_remove(KEY_TYPE) {
            Some(Value::String(name)) => name.parse::<TypeTag>()?,
            Some(_) => {
                return Err(ModelError::InvalidField {
                    field: KEY_TYPE,
                    reason: "expected a string".to_string(),
                })
            }
            None => return Err(ModelError::MissingField(KEY_TYPE)),
        };

        let id = match map.shift_remove(KEY_ID) {
            Some(Value::String(id)) => ObjectId(id),
            Some(Value::Null) | None if kind == TypeTag::Notification => ObjectId(String::new()),
            Some(_) => {
                return Err(ModelError::InvalidField {
                    field: KEY_ID,
                    reason: "expected a string".to_string(),
                })
            }
            None => return Err(ModelError::MissingField(KEY_ID)),
        };
        if id.is_empty() && kind != TypeTag::Notification {
            return Err(ModelError::EmptyIdentity(kind.to_string()));
        }

        let published = match map.shift_remove(KEY_PUBLISHED) {
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ModelError::InvalidField {
                    field: KEY_PUBLISHED,
                    reason: e.to_string(),
                })?,
            Some(_) => {
                return Err(ModelError::InvalidField {
                    field: KEY_PUBLISHED,
                    reason: "expected an RFC 3339 timestamp".to_string(),
                })
            }
            None => Utc::now(),
        };

        let context = match map.shift_remove(KEY_CONTEXT) {
            Some(Value::String(context)) if !context.trim().is_empty() => {
                Some(ObjectId(context))
            }
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(_) => {
                return Err(ModelError::InvalidField {
                    field: KEY_CONTEXT,
                    reason: "expected an identifier".to_string(),
                })
            }
        };

        Ok(Self {
            id,
            kind,
            attributes: map,
            published,
            context,
        })
    }
}

impl From<ProtocolObject> for Attributes {
    fn from(object: ProtocolObject) -> Self {
        object.to_map()
    }
}

impl TryFrom<Attributes> for ProtocolObject {
    type Error = ModelError;

    fn try_from(map: Attributes) -> Result<Self, Self::Error> {
        ProtocolObject::from_map(map)
    }
}

fn strip_local_attributes(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !key.starts_with(LOCAL_ATTR_PREFIX));
            map.values_mut().for_each(strip_local_attributes);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_local_attributes),
        _ => {}
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, KEY_ID | KEY_TYPE | KEY_PUBLISHED | KEY_CONTEXT)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn follow() -> ProtocolObject {
        ProtocolObject::new(
            ObjectId::from("https://remote.example/activities/1"),
            TypeTag::Follow,
        )
        .with_attribute(ATTR_ACTOR, "https://remote.example/users/bob")
        .with_attribute(ATTR_OBJECT, "https://local.example/users/alice")
    }

    #[test]
    fn test_local_attributes_are_stripped_at_every_depth() {
        let create = ProtocolObject::new(ObjectId::from("c1"), TypeTag::Create)
            .with_attribute("heraut:accepted", true)
            .with_attribute(
                ATTR_OBJECT,
                json!({
                    "id": "n1",
                    "type": "Note",
                    "heraut:local": true,
                    "tag": [{"heraut:local": true, "name": "@bob"}],
                }),
            );

        let stripped = create.without_local_attributes();
        assert!(stripped.attribute("heraut:accepted").is_none());
        assert_eq!(
            stripped.attribute(ATTR_OBJECT),
            Some(&json!({"id": "n1", "type": "Note", "tag": [{"name": "@bob"}]}))
        );
        assert!(crate::status::ATTR_LOCAL.starts_with(LOCAL_ATTR_PREFIX));
    }

    #[test]
    fn test_map_round_trip_preserves_everything() {
        let original = follow()
            .with_attribute("zeta", 1)
            .with_attribute("alpha", json!({"nested": true}))
            .with_context(ObjectId::from("https://remote.example/contexts/9"));

        let map = original.to_map();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["id", "type", "published", "context", "actor", "object", "zeta", "alpha"]
        );

        let restored = ProtocolObject::from_map(map).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_from_map_rejects_unknown_type() {
        let map = json!({"id": "x", "type": "Question"});
        let err = ProtocolObject::from_map(map.as_object().unwrap().clone()).unwrap_err();
        assert_eq!(err, ModelError::UnknownType("Question".to_string()));
    }

    #[test]
    fn test_empty_identity_only_for_notifications() {
        let note = json!({"id": "", "type": "Note"});
        assert!(matches!(
            ProtocolObject::from_map(note.as_object().unwrap().clone()),
            Err(ModelError::EmptyIdentity(_))
        ));

        let notification = json!({"type": "Notification", "account": "a"});
        let parsed =
            ProtocolObject::from_map(notification.as_object().unwrap().clone()).unwrap();
        assert!(parsed.id().is_empty());
    }

    #[test]
    fn test_target_reference_and_embedded() {
        let by_ref = follow();
        assert_eq!(
            by_ref.target().unwrap(),
            Some(ObjectRef::Reference(ObjectId::from(
                "https://local.example/users/alice"
            )))
        );

        let undo = ProtocolObject::new(ObjectId::from("u1"), TypeTag::Undo)
            .with_attribute(ATTR_OBJECT, Value::Object(by_ref.to_map()));
        match undo.target().unwrap() {
            Some(ObjectRef::Embedded(inner)) => assert_eq!(inner.kind(), TypeTag::Follow),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_reserved_keys_are_not_attributes() {
        let object = ProtocolObject::new(ObjectId::from("n1"), TypeTag::Note)
            .with_attribute("type", "Person")
            .with_attribute("content", "hi");
        assert_eq!(object.kind(), TypeTag::Note);
        assert_eq!(object.attributes().len(), 1);
    }

    #[test]
    fn test_serde_uses_structural_map() {
        let object = follow();
        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["type"], "Follow");
        let back: ProtocolObject = serde_json::from_value(value).unwrap();
        assert_eq!(back, object);
    }
}
