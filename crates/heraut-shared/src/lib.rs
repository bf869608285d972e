//! # heraut-shared
//!
//! The object model shared by every Héraut crate: protocol object envelopes,
//! the closed set of type tags, posts and their mentions.

pub mod constants;
pub mod error;
pub mod object;
pub mod status;
pub mod types;

pub use error::ModelError;
pub use object::{Attributes, ObjectRef, ProtocolObject, ATTR_ACTOR, ATTR_OBJECT, LOCAL_ATTR_PREFIX};
pub use status::{extract_mentions, Mention, Status};
pub use types::{AccountId, ObjectId, TypeTag};
