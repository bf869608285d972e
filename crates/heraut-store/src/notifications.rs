use rusqlite::{params, OptionalExtension};

use heraut_shared::{AccountId, ObjectId, ProtocolObject};

use crate::database::{parse_json_map, Database};
use crate::error::{map_insert_error, Result, StoreError};

impl Database {
    /// Persist a notification for `recipient`. The notification's published
    /// timestamp is stored as given; callers stamp it at save time.
    pub fn insert_notification(
        &self,
        recipient: &AccountId,
        notification: &ProtocolObject,
    ) -> Result<()> {
        let payload = serde_json::to_string(&notification.to_map())?;
        self.conn()
            .execute(
                "INSERT INTO notifications (id, account_id, payload, published)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    notification.id().as_str(),
                    recipient.as_str(),
                    payload,
                    notification.published().to_rfc3339(),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    pub fn update_notification(&self, notification: &ProtocolObject) -> Result<()> {
        let payload = serde_json::to_string(&notification.to_map())?;
        let affected = self.conn().execute(
            "UPDATE notifications SET payload = ?1 WHERE id = ?2",
            params![payload, notification.id().as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn find_notification(&self, id: &ObjectId) -> Result<Option<ProtocolObject>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM notifications WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(ProtocolObject::from_map(serde_json::from_str(&raw)?)?)),
            None => Ok(None),
        }
    }

    /// Most recent notifications of one account, newest first.
    pub fn list_notifications(
        &self,
        recipient: &AccountId,
        limit: u32,
    ) -> Result<Vec<ProtocolObject>> {
        let mut stmt = self.conn().prepare(
            "SELECT payload FROM notifications
             WHERE account_id = ?1
             ORDER BY published DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![recipient.as_str(), limit], |row| {
            let raw: String = row.get(0)?;
            parse_json_map(0, &raw)
        })?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(ProtocolObject::from_map(row?)?);
        }
        Ok(notifications)
    }

    pub fn delete_notification(&self, id: &ObjectId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use heraut_shared::TypeTag;

    use super::*;

    #[test]
    fn test_notification_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let recipient = AccountId::from("https://local.example/users/alice");
        let notification_id = ObjectId::from("f1#notification");
        let notification = ProtocolObject::new(notification_id, TypeTag::Notification)
            .with_attribute("account", recipient.as_str())
            .with_attribute("notificationType", "follow");

        db.insert_notification(&recipient, &notification).unwrap();
        assert!(matches!(
            db.insert_notification(&recipient, &notification),
            Err(StoreError::AlreadyExists)
        ));

        let listed = db.list_notifications(&recipient, 10).unwrap();
        assert_eq!(listed, vec![notification.clone()]);
        assert_eq!(
            db.find_notification(notification.id()).unwrap(),
            Some(notification.clone())
        );

        assert!(db.delete_notification(notification.id()).unwrap());
        assert!(db.find_notification(notification.id()).unwrap().is_none());
    }
}
