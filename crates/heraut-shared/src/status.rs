//! Posts ("statuses") and the mentions they carry.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::object::ProtocolObject;
use crate::types::{AccountId, ObjectId, TypeTag};

pub const ATTR_ATTRIBUTED_TO: &str = "attributedTo";
pub const ATTR_CONTENT: &str = "content";
pub const ATTR_TAG: &str = "tag";
pub const ATTR_LOCAL: &str = "heraut:local";

/// `@user` or `@user@host`, not preceded by a word character or another `@`.
fn mention_regex() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| {
        Regex::new(r"(?:^|[^\w@])@([A-Za-z0-9_]+)(?:@([A-Za-z0-9][A-Za-z0-9.\-]*[A-Za-z0-9]))?")
            .expect("mention pattern is valid")
    })
}

/// An account mentioned in a post body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mention {
    pub username: String,
    /// `None` for `@user`, the host for `@user@host`.
    pub domain: Option<String>,
}

impl Mention {
    /// Whether this mention designates an account of the given instance.
    pub fn is_local_to(&self, local_domain: &str) -> bool {
        match &self.domain {
            None => true,
            Some(domain) => domain.eq_ignore_ascii_case(local_domain),
        }
    }

    pub fn to_handle(&self) -> String {
        match &self.domain {
            Some(domain) => format!("@{}@{}", self.username, domain),
            None => format!("@{}", self.username),
        }
    }

    pub fn parse(handle: &str) -> Option<Self> {
        extract_mentions(handle).into_iter().next()
    }
}

/// Mentions in the order they appear in `body`, without repeats.
pub fn extract_mentions(body: &str) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = Vec::new();
    for caps in mention_regex().captures_iter(body) {
        let mention = Mention {
            username: caps[1].to_string(),
            domain: caps.get(2).map(|m| m.as_str().to_ascii_lowercase()),
        };
        if !mentions.contains(&mention) {
            mentions.push(mention);
        }
    }
    mentions
}

/// A post, as handed to the fan-out delivery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: ObjectId,
    pub author: AccountId,
    pub body: String,
    /// `true` when the post originates on this instance.
    pub local: bool,
    /// Extracted from `body` at creation time.
    pub mentions: Vec<Mention>,
    pub published: DateTime<Utc>,
}

impl Status {
    pub fn new(id: ObjectId, author: AccountId, body: impl Into<String>, local: bool) -> Self {
        let body = body.into();
        let mentions = extract_mentions(&body);
        Self {
            id,
            author,
            body,
            local,
            mentions,
            published: Utc::now(),
        }
    }

    /// The `Note` object representing this post.
    pub fn to_object(&self) -> ProtocolObject {
        let tags: Vec<Value> = self
            .mentions
            .iter()
            .map(|m| Value::String(m.to_handle()))
            .collect();
        ProtocolObject::new(self.id.clone(), TypeTag::Note)
            .with_published(self.published)
            .with_attribute(ATTR_ATTRIBUTED_TO, self.author.as_str())
            .with_attribute(ATTR_CONTENT, self.body.as_str())
            .with_attribute(ATTR_LOCAL, self.local)
            .with_attribute(ATTR_TAG, Value::Array(tags))
    }

    /// Rebuild a post from a `Note` object. Mentions are re-extracted from
    /// the body so they always follow the text order.
    pub fn from_object(object: &ProtocolObject) -> Result<Self, ModelError> {
        if object.kind() != TypeTag::Note {
            return Err(ModelError::InvalidField {
                field: "type",
                reason: format!("expected Note, got {}", object.kind()),
            });
        }
        let author = object
            .str_attribute(ATTR_ATTRIBUTED_TO)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ModelError::MissingField(ATTR_ATTRIBUTED_TO))?;
        let body = object.str_attribute(ATTR_CONTENT).unwrap_or_default();
        let local = object
            .attribute(ATTR_LOCAL)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            id: object.id().clone(),
            author: AccountId::new(author),
            body: body.to_string(),
            local,
            mentions: extract_mentions(body),
            published: object.published(),
        })
    }
}
