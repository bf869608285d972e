use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use heraut_shared::{AccountId, ObjectId};

use crate::database::{parse_timestamp, Database};
use crate::error::{map_insert_error, map_lookup_error, Result, StoreError};
use crate::models::{Account, Follow};

const ACCOUNT_COLUMNS: &str = "id, handle, url, local, created_at";

impl Database {
    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO accounts (id, handle, url, local, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    account.id.as_str(),
                    account.handle,
                    account.url,
                    account.local,
                    account.created_at.to_rfc3339(),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    /// Insert or refresh an account keyed by its id. Fails with
    /// [`StoreError::HandleTaken`] when a different account owns the handle.
    pub fn upsert_account(&self, account: &Account) -> Result<()> {
        self.conn().execute(
            "INSERT INTO accounts (id, handle, url, local, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET handle = excluded.handle, url = excluded.url",
            params![
                account.id.as_str(),
                account.handle,
                account.url,
                account.local,
                account.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match map_insert_error(e) {
            StoreError::AlreadyExists => StoreError::HandleTaken(account.handle.clone()),
            other => other,
        })?;
        Ok(())
    }

    pub fn get_account(&self, id: &AccountId) -> Result<Account> {
        self.conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.as_str()],
                row_to_account,
            )
            .map_err(map_lookup_error)
    }

    pub fn find_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let account = self
            .conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.as_str()],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Look up a local account by its bare handle (`alice`, not `@alice`).
    pub fn find_local_account_by_handle(&self, handle: &str) -> Result<Option<Account>> {
        let account = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts
                     WHERE local = 1 AND handle = ?1 COLLATE NOCASE"
                ),
                params![handle],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn is_local_account(&self, id: &AccountId) -> Result<bool> {
        let local: Option<bool> = self
            .conn()
            .query_row(
                "SELECT local FROM accounts WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(local.unwrap_or(false))
    }

    // -----------------------------------------------------------------------
    // Follow edges
    // -----------------------------------------------------------------------

    /// Record that `follower` follows `followee`. Returns `false` when the
    /// edge already existed.
    pub fn add_follow(
        &self,
        follower: &AccountId,
        followee: &AccountId,
        activity_id: Option<&ObjectId>,
    ) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, activity_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                follower.as_str(),
                followee.as_str(),
                activity_id.map(ObjectId::as_str),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_follow(&self, follower: &AccountId, followee: &AccountId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.as_str(), followee.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_follow_accepted(&self, follower: &AccountId, followee: &AccountId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE follows SET accepted = 1 WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.as_str(), followee.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_follow(&self, follower: &AccountId, followee: &AccountId) -> Result<Follow> {
        self.conn()
            .query_row(
                "SELECT follower_id, followee_id, activity_id, accepted, created_at
                 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower.as_str(), followee.as_str()],
                row_to_follow,
            )
            .map_err(map_lookup_error)
    }

    pub fn is_following(&self, follower: &AccountId, followee: &AccountId) -> Result<bool> {
        let exists: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower.as_str(), followee.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Local accounts following `followee`, in follow-table insertion order.
    pub fn list_local_followers(&self, followee: &AccountId) -> Result<Vec<AccountId>> {
        let mut stmt = self.conn().prepare(
            "SELECT f.follower_id
             FROM follows f
             JOIN accounts a ON a.id = f.follower_id
             WHERE f.followee_id = ?1 AND a.local = 1
             ORDER BY f.seq ASC",
        )?;

        let rows = stmt.query_map(params![followee.as_str()], |row| {
            row.get::<_, String>(0).map(AccountId)
        })?;

        let mut followers = Vec::new();
        for row in rows {
            followers.push(row?);
        }
        Ok(followers)
    }

    pub fn count_followers(&self, followee: &AccountId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
            params![followee.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    Ok(Account {
        id: AccountId(id),
        handle: row.get(1)?,
        url: row.get(2)?,
        local: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

fn row_to_follow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Follow> {
    let follower: String = row.get(0)?;
    let followee: String = row.get(1)?;
    let activity_id: Option<String> = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(Follow {
        follower: AccountId(follower),
        followee: AccountId(followee),
        activity_id: activity_id.map(ObjectId),
        accepted: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}
