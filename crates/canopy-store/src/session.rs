//! Logout flags, cached user activity and sync records used by the
//! session handoff flows.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::Database;
use crate::error::Result;
use crate::models::{parse_timestamp, UserActivity};

impl Database {
    // ------------------------------------------------------------------
    // Logout flags
    // ------------------------------------------------------------------

    /// Record that `user_id` logged out.  Auto-logins are refused until cleared.
    pub fn set_logout_flag(&self, user_id: &str, client_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO logout_flags (user_id, client_id, flagged_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET
                client_id = excluded.client_id,
                flagged_at = excluded.flagged_at",
            params![user_id, client_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn has_logout_flag(&self, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM logout_flags WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns `true` if a flag was removed.
    pub fn clear_logout_flag(&self, user_id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM logout_flags WHERE user_id = ?1", params![user_id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // User activity
    // ------------------------------------------------------------------

    pub fn record_user_activity(&self, user_id: &str, site_name: &str, activity: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_activity (user_id, site_name, activity, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, site_name, activity, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_user_activity(&self, user_id: &str) -> Result<Vec<UserActivity>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, site_name, activity, created_at
             FROM user_activity WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let created_str: String = row.get(4)?;
            Ok(UserActivity {
                id: row.get(0)?,
                user_id: row.get(1)?,
                site_name: row.get(2)?,
                activity: row.get(3)?,
                created_at: parse_timestamp(4, &created_str)?,
            })
        })?;

        let mut activity = Vec::new();
        for row in rows {
            activity.push(row?);
        }
        Ok(activity)
    }

    pub fn clear_user_activity(&self, user_id: &str) -> Result<usize> {
        let affected = self
            .conn()
            .execute("DELETE FROM user_activity WHERE user_id = ?1", params![user_id])?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Sync data
    // ------------------------------------------------------------------

    pub fn insert_sync_data(&self, sync_key: &str, payload: &Value) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        self.conn().execute(
            "INSERT INTO sync_data (sync_key, payload, created_at) VALUES (?1, ?2, ?3)",
            params![sync_key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn count_sync_data(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_data", [], |row| row.get(0))?;
        Ok(count)
    }
}
