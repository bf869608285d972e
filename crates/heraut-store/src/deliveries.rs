use chrono::Utc;
use rusqlite::params;

use heraut_shared::ObjectId;

use crate::database::{parse_timestamp, Database};
use crate::error::Result;
use crate::models::{Delivery, DeliveryState};

impl Database {
    /// Register an upcoming delivery attempt. Existing rows keep their
    /// attempt counter.
    pub fn record_delivery_pending(&self, activity_id: &ObjectId, inbox: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO deliveries (activity_id, inbox, state, attempts, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3)
             ON CONFLICT(activity_id, inbox) DO UPDATE SET
                 state = 'pending', updated_at = excluded.updated_at",
            params![activity_id.as_str(), inbox, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the outcome of one attempt.
    pub fn record_delivery_result(
        &self,
        activity_id: &ObjectId,
        inbox: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let state = if error.is_some() {
            DeliveryState::Failed
        } else {
            DeliveryState::Delivered
        };
        self.conn().execute(
            "INSERT INTO deliveries (activity_id, inbox, state, attempts, last_error, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(activity_id, inbox) DO UPDATE SET
                 state = excluded.state,
                 attempts = deliveries.attempts + 1,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![
                activity_id.as_str(),
                inbox,
                state.as_str(),
                error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_deliveries(&self, activity_id: &ObjectId) -> Result<Vec<Delivery>> {
        let mut stmt = self.conn().prepare(
            "SELECT activity_id, inbox, state, attempts, last_error, updated_at
             FROM deliveries WHERE activity_id = ?1 ORDER BY inbox ASC",
        )?;

        let rows = stmt.query_map(params![activity_id.as_str()], |row| {
            let activity_id: String = row.get(0)?;
            let state: String = row.get(2)?;
            let updated_at: String = row.get(5)?;
            let state = state.parse::<DeliveryState>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?;
            Ok(Delivery {
                activity_id: ObjectId(activity_id),
                inbox: row.get(1)?,
                state,
                attempts: row.get(3)?,
                last_error: row.get(4)?,
                updated_at: parse_timestamp(5, &updated_at)?,
            })
        })?;

        let mut deliveries = Vec::new();
        for row in rows {
            deliveries.push(row?);
        }
        Ok(deliveries)
    }

    /// Number of inboxes that acknowledged the activity.
    pub fn count_acknowledged_deliveries(&self, activity_id: &ObjectId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM deliveries WHERE activity_id = ?1 AND state = 'delivered'",
            params![activity_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}
