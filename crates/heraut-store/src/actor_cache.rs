//! Remote actor cache rows.
//!
//! (account, url) identify at most one row.  [`Database::upsert_cached_actor`]
//! runs in a single transaction so concurrent first fetches of the same actor
//! converge on one row instead of racing into duplicates.

use rusqlite::{params, OptionalExtension, TransactionBehavior};

use heraut_shared::Attributes;

use crate::database::{parse_json_map, Database};
use crate::error::Result;
use crate::models::CachedActor;

const CACHE_COLUMNS: &str = "key, account, url, profile, created_at";

impl Database {
    /// Find a cached actor by account handle or canonical URL.
    pub fn find_cached_actor(&self, identifier: &str) -> Result<Option<CachedActor>> {
        let actor = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CACHE_COLUMNS} FROM actor_cache
                     WHERE account = ?1 OR url = ?1
                     ORDER BY key ASC LIMIT 1"
                ),
                params![identifier],
                row_to_cached_actor,
            )
            .optional()?;
        Ok(actor)
    }

    /// Insert or refresh the row for (account, url), stamping `created_at`.
    ///
    /// A row that holds the same URL under a different account (the remote
    /// renamed the actor) is replaced, so neither key can end up duplicated.
    pub fn upsert_cached_actor(
        &mut self,
        account: &str,
        url: &str,
        profile: &Attributes,
        created_at: i64,
    ) -> Result<CachedActor> {
        let profile_json = serde_json::to_string(profile)?;

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM actor_cache WHERE url = ?1 AND account <> ?2",
            params![url, account],
        )?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT key FROM actor_cache WHERE account = ?1",
                params![account],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(key) => {
                tx.execute(
                    "UPDATE actor_cache SET url = ?1, profile = ?2, created_at = ?3 WHERE key = ?4",
                    params![url, profile_json, created_at, key],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO actor_cache (account, url, profile, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![account, url, profile_json, created_at],
                )?;
            }
        }
        let row = tx.query_row(
            &format!("SELECT {CACHE_COLUMNS} FROM actor_cache WHERE account = ?1"),
            params![account],
            row_to_cached_actor,
        )?;

        tx.commit()?;
        Ok(row)
    }

    /// Drop a cached actor by account or URL. Returns `false` if absent.
    pub fn remove_cached_actor(&self, identifier: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM actor_cache WHERE account = ?1 OR url = ?1",
            params![identifier],
        )?;
        Ok(affected > 0)
    }

    pub fn count_cached_actors(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM actor_cache", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_cached_actor(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedActor> {
    let profile: String = row.get(3)?;
    Ok(CachedActor {
        key: row.get(0)?,
        account: row.get(1)?,
        url: row.get(2)?,
        profile: parse_json_map(3, &profile)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const BOB_URL: &str = "https://remote.example/users/bob";
    const SHARED_URL: &str = "https://remote.example/u/1";

    fn profile(name: &str) -> Attributes {
        json!({"name": name, "preferredUsername": "bob"})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_upsert_keeps_one_row_per_actor() {
        let mut db = Database::open_in_memory().unwrap();
        let first = db
            .upsert_cached_actor("bob@remote.example", BOB_URL, &profile("Bob"), 100)
            .unwrap();
        let second = db
            .upsert_cached_actor("bob@remote.example", BOB_URL, &profile("Robert"), 200)
            .unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(second.created_at, 200);
        assert_eq!(second.profile["name"], "Robert");
        assert_eq!(db.count_cached_actors().unwrap(), 1);

        let by_url = db
            .find_cached_actor(BOB_URL)
            .unwrap()
            .unwrap();
        assert_eq!(by_url, second);
    }

    #[test]
    fn test_upsert_replaces_renamed_account() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_cached_actor("old@remote.example", SHARED_URL, &profile("Old"), 1)
            .unwrap();
        db.upsert_cached_actor("new@remote.example", SHARED_URL, &profile("New"), 2)
            .unwrap();

        assert_eq!(db.count_cached_actors().unwrap(), 1);
        assert!(db.find_cached_actor("old@remote.example").unwrap().is_none());
        assert!(db.remove_cached_actor(SHARED_URL).unwrap());
        assert_eq!(db.count_cached_actors().unwrap(), 0);
    }
}
