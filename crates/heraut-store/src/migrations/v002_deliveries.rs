//! v002 -- Outbound delivery bookkeeping.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS deliveries (
    activity_id TEXT NOT NULL,
    inbox       TEXT NOT NULL,
    state       TEXT NOT NULL,                -- "pending" | "delivered" | "failed"
    attempts    INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    updated_at  TEXT NOT NULL,

    PRIMARY KEY (activity_id, inbox)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
