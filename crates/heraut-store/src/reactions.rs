use chrono::Utc;
use rusqlite::params;

use heraut_shared::{AccountId, ObjectId};

use crate::database::{parse_timestamp, Database};
use crate::error::Result;
use crate::models::Reaction;

impl Database {
    /// Record a like/boost. Re-recording the same reaction is a no-op and
    /// returns `false`.
    pub fn add_reaction(
        &self,
        object_id: &ObjectId,
        actor_id: &AccountId,
        kind: &str,
        activity_id: &ObjectId,
    ) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (object_id, actor_id, kind, activity_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                object_id.as_str(),
                actor_id.as_str(),
                kind,
                activity_id.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_reaction(
        &self,
        object_id: &ObjectId,
        actor_id: &AccountId,
        kind: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE object_id = ?1 AND actor_id = ?2 AND kind = ?3",
            params![object_id.as_str(), actor_id.as_str(), kind],
        )?;
        Ok(affected > 0)
    }

    /// Remove every reaction on an object (the object was deleted).
    pub fn clear_reactions(&self, object_id: &ObjectId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE object_id = ?1",
            params![object_id.as_str()],
        )?;
        Ok(affected)
    }

    pub fn list_reactions(&self, object_id: &ObjectId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT object_id, actor_id, kind, activity_id, created_at
             FROM reactions WHERE object_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![object_id.as_str()], |row| {
            let object_id: String = row.get(0)?;
            let actor_id: String = row.get(1)?;
            let activity_id: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(Reaction {
                object_id: ObjectId(object_id),
                actor_id: AccountId(actor_id),
                kind: row.get(2)?,
                activity_id: ObjectId(activity_id),
                created_at: parse_timestamp(4, &created_at)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactions_are_unique_per_actor_and_kind() {
        let db = Database::open_in_memory().unwrap();
        let note = ObjectId::from("n1");
        let bob = AccountId::from("bob");

        assert!(db.add_reaction(&note, &bob, "Like", &ObjectId::from("l1")).unwrap());
        assert!(!db.add_reaction(&note, &bob, "Like", &ObjectId::from("l2")).unwrap());
        assert!(db.add_reaction(&note, &bob, "Announce", &ObjectId::from("a1")).unwrap());
        assert_eq!(db.list_reactions(&note).unwrap().len(), 2);

        assert!(db.remove_reaction(&note, &bob, "Like").unwrap());
        assert_eq!(db.clear_reactions(&note).unwrap(), 1);
        assert!(db.list_reactions(&note).unwrap().is_empty());
    }
}
