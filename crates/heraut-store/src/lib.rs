//! # heraut-store
//!
//! SQLite persistence for the Héraut federation engine.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every table the
//! federation handlers own: accounts and follow edges, protocol objects,
//! notifications, reactions, the remote actor cache, home streams and
//! outbound delivery attempts.

pub mod accounts;
pub mod actor_cache;
pub mod database;
pub mod deliveries;
pub mod home;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod objects;
pub mod reactions;

mod error;

pub use database::{Database, SharedDatabase};
pub use error::{Result, StoreError};
pub use models::*;
