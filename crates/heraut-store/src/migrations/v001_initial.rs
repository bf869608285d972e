//! v001 -- Initial schema creation.
//!
//! Accounts and follow edges, protocol objects, notifications, reactions,
//! the remote actor cache and home streams.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Accounts (local and known remote)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    id         TEXT PRIMARY KEY NOT NULL,     -- actor URI
    handle     TEXT NOT NULL UNIQUE,          -- "alice" locally, "bob@remote.example" otherwise
    url        TEXT NOT NULL,
    local      INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    created_at TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Follow edges. `seq` gives the deterministic iteration order.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS follows (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    follower_id TEXT NOT NULL,
    followee_id TEXT NOT NULL,
    activity_id TEXT,                         -- Follow activity that created the edge
    accepted    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,

    UNIQUE (follower_id, followee_id)
);

CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id, seq);

-- ----------------------------------------------------------------
-- Protocol objects (actors, notes, activities)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS objects (
    id         TEXT PRIMARY KEY NOT NULL,
    kind       TEXT NOT NULL,                 -- type tag
    payload    TEXT NOT NULL,                 -- ordered JSON map
    published  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_objects_kind ON objects(kind);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,
    account_id TEXT NOT NULL,                 -- recipient
    payload    TEXT NOT NULL,
    published  TEXT NOT NULL                  -- stamped when saved
);

CREATE INDEX IF NOT EXISTS idx_notifications_account
    ON notifications(account_id, published DESC);

-- ----------------------------------------------------------------
-- Reactions (likes and boosts) on objects
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    object_id   TEXT NOT NULL,
    actor_id    TEXT NOT NULL,
    kind        TEXT NOT NULL,                -- "Like" | "Announce"
    activity_id TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    PRIMARY KEY (object_id, actor_id, kind)
);

-- ----------------------------------------------------------------
-- Remote actor cache
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS actor_cache (
    key        INTEGER PRIMARY KEY AUTOINCREMENT,
    account    TEXT NOT NULL UNIQUE,
    url        TEXT NOT NULL UNIQUE,
    profile    TEXT NOT NULL,                 -- ordered JSON map
    created_at INTEGER NOT NULL               -- epoch seconds
);

-- ----------------------------------------------------------------
-- Home streams
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS home_streams (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  TEXT NOT NULL,
    status_id   TEXT NOT NULL,
    inserted_at TEXT NOT NULL,

    UNIQUE (account_id, status_id)
);

CREATE INDEX IF NOT EXISTS idx_home_streams_account ON home_streams(account_id, seq DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
