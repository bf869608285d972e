//! Row types persisted in the instance database.
//!
//! Protocol objects and notifications are stored as their structural map and
//! come back as [`heraut_shared::ProtocolObject`]; the structs below cover the
//! relational tables.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use heraut_shared::{AccountId, Attributes, ObjectId};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A known account. Local accounts can receive home-stream deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Actor URI.
    pub id: AccountId,
    /// `alice` for a local account, `bob@remote.example` for a remote one.
    pub handle: String,
    /// Profile URL.
    pub url: String,
    /// Whether the account lives on this instance.
    pub local: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Follow
// ---------------------------------------------------------------------------

/// A follow edge between two accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Follow {
    pub follower: AccountId,
    pub followee: AccountId,
    /// The Follow activity that created the edge, if it came from one.
    pub activity_id: Option<ObjectId>,
    /// Set once an Accept for the Follow has been processed.
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Remote actor cache
// ---------------------------------------------------------------------------

/// A cached remote actor profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedActor {
    /// Row key.
    pub key: i64,
    /// Account handle, unique within the cache.
    pub account: String,
    /// Canonical actor URL, unique within the cache.
    pub url: String,
    /// Last known actor attributes.
    pub profile: Attributes,
    /// When the row was last fetched (epoch seconds).
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// A like or boost of an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub object_id: ObjectId,
    pub actor_id: AccountId,
    /// Type tag of the reacting activity ("Like" or "Announce").
    pub kind: String,
    pub activity_id: ObjectId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Home stream
// ---------------------------------------------------------------------------

/// One post in a recipient's home stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HomeEntry {
    pub account_id: AccountId,
    pub status_id: ObjectId,
    pub inserted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery state: {other}")),
        }
    }
}

/// One outbound delivery of an activity to a remote inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub activity_id: ObjectId,
    pub inbox: String,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
