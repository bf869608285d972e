//! Generic protocol object rows.
//!
//! Each handler owns the rows of its own type tag; lookups are always scoped
//! by `kind` so one handler never sees another handler's objects.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use heraut_shared::{ObjectId, ProtocolObject, TypeTag};

use crate::database::Database;
use crate::error::{map_insert_error, Result, StoreError};

impl Database {
    /// Insert a new object. Fails with [`StoreError::AlreadyExists`] when the
    /// identity is already stored (whatever its kind).
    pub fn insert_object(&self, object: &ProtocolObject) -> Result<()> {
        let payload = serde_json::to_string(&object.to_map())?;
        self.conn()
            .execute(
                "INSERT INTO objects (id, kind, payload, published, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    object.id().as_str(),
                    object.kind().as_str(),
                    payload,
                    object.published().to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    /// Replace the payload of an existing object of the same kind.
    pub fn update_object(&self, object: &ProtocolObject) -> Result<()> {
        let payload = serde_json::to_string(&object.to_map())?;
        let affected = self.conn().execute(
            "UPDATE objects SET payload = ?1, published = ?2, updated_at = ?3
             WHERE id = ?4 AND kind = ?5",
            params![
                payload,
                object.published().to_rfc3339(),
                Utc::now().to_rfc3339(),
                object.id().as_str(),
                object.kind().as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_object(&self, id: &ObjectId, kind: TypeTag) -> Result<ProtocolObject> {
        self.find_object(id, kind)?.ok_or(StoreError::NotFound)
    }

    pub fn find_object(&self, id: &ObjectId, kind: TypeTag) -> Result<Option<ProtocolObject>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM objects WHERE id = ?1 AND kind = ?2",
                params![id.as_str(), kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => {
                let map = serde_json::from_str(&raw)?;
                Ok(Some(ProtocolObject::from_map(map)?))
            }
            None => Ok(None),
        }
    }

    /// Delete an object of the given kind. Returns `false` if it was absent.
    pub fn delete_object(&self, id: &ObjectId, kind: TypeTag) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM objects WHERE id = ?1 AND kind = ?2",
            params![id.as_str(), kind.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn count_objects(&self, kind: TypeTag) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM objects WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, content: &str) -> ProtocolObject {
        ProtocolObject::new(ObjectId::from(id), TypeTag::Note)
            .with_attribute("attributedTo", "https://local.example/users/alice")
            .with_attribute("content", content)
    }

    #[test]
    fn test_object_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let original = note("n1", "first");

        db.insert_object(&original).unwrap();
        assert_eq!(db.get_object(original.id(), TypeTag::Note).unwrap(), original);
        assert!(matches!(
            db.insert_object(&original),
            Err(StoreError::AlreadyExists)
        ));

        let edited = note("n1", "edited").with_published(original.published());
        db.update_object(&edited).unwrap();
        assert_eq!(db.get_object(edited.id(), TypeTag::Note).unwrap(), edited);

        assert!(db.delete_object(edited.id(), TypeTag::Note).unwrap());
        assert!(!db.delete_object(edited.id(), TypeTag::Note).unwrap());
        assert!(matches!(
            db.update_object(&edited),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_lookups_are_scoped_by_kind() {
        let db = Database::open_in_memory().unwrap();
        db.insert_object(&note("n1", "hi")).unwrap();
        assert!(db
            .find_object(&ObjectId::from("n1"), TypeTag::Person)
            .unwrap()
            .is_none());
        assert!(!db
            .delete_object(&ObjectId::from("n1"), TypeTag::Person)
            .unwrap());
        assert_eq!(db.count_objects(TypeTag::Note).unwrap(), 1);
    }
}
