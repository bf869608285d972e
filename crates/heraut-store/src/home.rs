use chrono::Utc;
use rusqlite::params;

use heraut_shared::{AccountId, ObjectId, ProtocolObject};

use crate::database::{parse_json_map, parse_timestamp, Database};
use crate::error::Result;
use crate::models::HomeEntry;

impl Database {
    /// Append a post to a recipient's home stream. A post already present in
    /// that stream is left alone and `false` is returned.
    pub fn add_to_home(&self, recipient: &AccountId, status_id: &ObjectId) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO home_streams (account_id, status_id, inserted_at)
             VALUES (?1, ?2, ?3)",
            params![
                recipient.as_str(),
                status_id.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Home stream entries of one recipient, newest first.
    pub fn home_entries(&self, recipient: &AccountId, limit: u32) -> Result<Vec<HomeEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT account_id, status_id, inserted_at
             FROM home_streams
             WHERE account_id = ?1
             ORDER BY seq DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![recipient.as_str(), limit], |row| {
            let account_id: String = row.get(0)?;
            let status_id: String = row.get(1)?;
            let inserted_at: String = row.get(2)?;
            Ok(HomeEntry {
                account_id: AccountId(account_id),
                status_id: ObjectId(status_id),
                inserted_at: parse_timestamp(2, &inserted_at)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Posts in a recipient's home stream, newest first. Entries whose post
    /// has since been deleted are skipped.
    pub fn home_timeline(&self, recipient: &AccountId, limit: u32) -> Result<Vec<ProtocolObject>> {
        let mut stmt = self.conn().prepare(
            "SELECT o.payload
             FROM home_streams h
             JOIN objects o ON o.id = h.status_id AND o.kind = 'Note'
             WHERE h.account_id = ?1
             ORDER BY h.seq DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![recipient.as_str(), limit], |row| {
            let raw: String = row.get(0)?;
            parse_json_map(0, &raw)
        })?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(ProtocolObject::from_map(row?)?);
        }
        Ok(posts)
    }

    /// Remove a post from every home stream (the post was deleted).
    pub fn remove_from_homes(&self, status_id: &ObjectId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM home_streams WHERE status_id = ?1",
            params![status_id.as_str()],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use heraut_shared::TypeTag;

    use super::*;

    #[test]
    fn test_home_stream_is_deduplicated_and_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let alice = AccountId::from("alice");
        let first = ProtocolObject::new(ObjectId::from("s1"), TypeTag::Note);
        let second = ProtocolObject::new(ObjectId::from("s2"), TypeTag::Note);
        db.insert_object(&first).unwrap();
        db.insert_object(&second).unwrap();

        assert!(db.add_to_home(&alice, first.id()).unwrap());
        assert!(!db.add_to_home(&alice, first.id()).unwrap());
        assert!(db.add_to_home(&alice, second.id()).unwrap());

        let entries = db.home_entries(&alice, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status_id, *second.id());

        let timeline = db.home_timeline(&alice, 10).unwrap();
        assert_eq!(timeline, vec![second.clone(), first.clone()]);

        db.delete_object(second.id(), TypeTag::Note).unwrap();
        assert_eq!(db.home_timeline(&alice, 10).unwrap(), vec![first]);
        assert_eq!(db.remove_from_homes(second.id()).unwrap(), 1);
    }
}
