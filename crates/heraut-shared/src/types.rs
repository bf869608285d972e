use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Globally unique identity of a protocol object (an opaque URI).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity of an account (the actor URI), local or remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The same identity viewed as an object reference.
    pub fn to_object_id(&self) -> ObjectId {
        ObjectId(self.0.clone())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Closed set of protocol types the engine knows how to handle.
///
/// Every tag resolves to exactly one handler at startup; a wire type name
/// outside this set is rejected while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeTag {
    Person,
    Note,
    Notification,
    Follow,
    Like,
    Announce,
    Undo,
    Create,
    Delete,
    Accept,
}

impl TypeTag {
    pub const ALL: [TypeTag; 10] = [
        TypeTag::Person,
        TypeTag::Note,
        TypeTag::Notification,
        TypeTag::Follow,
        TypeTag::Like,
        TypeTag::Announce,
        TypeTag::Undo,
        TypeTag::Create,
        TypeTag::Delete,
        TypeTag::Accept,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Note => "Note",
            Self::Notification => "Notification",
            Self::Follow => "Follow",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Undo => "Undo",
            Self::Create => "Create",
            Self::Delete => "Delete",
            Self::Accept => "Accept",
        }
    }

    /// Whether objects of this type act on a distinct target object.
    pub fn is_activity(&self) -> bool {
        !self.target_candidates().is_empty()
    }

    /// Types a by-reference target of this activity may have, most likely
    /// first. Empty for non-activities.
    pub fn target_candidates(&self) -> &'static [TypeTag] {
        match self {
            Self::Follow => &[TypeTag::Person],
            Self::Like | Self::Announce | Self::Create => &[TypeTag::Note],
            Self::Undo => &[TypeTag::Follow, TypeTag::Like, TypeTag::Announce],
            Self::Accept => &[TypeTag::Follow],
            Self::Delete => &[TypeTag::Note, TypeTag::Person],
            Self::Person | Self::Note | Self::Notification => &[],
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| ModelError::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_parses_wire_names() {
        for tag in TypeTag::ALL {
            assert_eq!(tag.as_str().parse::<TypeTag>().unwrap(), tag);
        }
        assert!(matches!(
            "Question".parse::<TypeTag>(),
            Err(ModelError::UnknownType(_))
        ));
    }

    #[test]
    fn test_activity_classification() {
        assert!(TypeTag::Follow.is_activity());
        assert!(TypeTag::Undo.is_activity());
        assert!(!TypeTag::Note.is_activity());
        assert!(!TypeTag::Notification.is_activity());
        assert_eq!(TypeTag::Follow.target_candidates(), &[TypeTag::Person]);
    }
}
