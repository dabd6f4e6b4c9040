//! CRUD operations for [`LocalUser`] records and the node-id consistency rule.
//!
//! Every user registered by one client shares that client's `node_id`.  When
//! the first id is needed it is generated once and back-filled onto all of
//! the client's existing users inside the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use canopy_shared::types::generate_node_id;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{parse_timestamp, LocalUser, NewLocalUser};

const USER_COLUMNS: &str = "user_id, username, node_id, domain_id, cluster_id, channel_id, \
                            is_current, client_id, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a user for a client, enforcing node-id consistency.
    ///
    /// Re-adding an existing `(user_id, client_id)` pair refreshes the
    /// username instead of failing.
    pub fn add_local_user(&self, new_user: &NewLocalUser) -> Result<LocalUser> {
        let now = Utc::now();
        let tx = self.conn().unchecked_transaction()?;

        let node_id = resolve_node_id(&tx, &new_user.client_id, now)?;

        if new_user.make_current {
            tx.execute(
                "UPDATE local_users SET is_current = 0, updated_at = ?1
                 WHERE client_id = ?2 AND is_current = 1",
                params![now.to_rfc3339(), new_user.client_id],
            )?;
        }

        tx.execute(
            "INSERT INTO local_users
                (user_id, username, node_id, is_current, client_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (user_id, client_id) DO UPDATE SET
                username   = excluded.username,
                node_id    = excluded.node_id,
                is_current = MAX(local_users.is_current, excluded.is_current),
                updated_at = excluded.updated_at",
            params![
                new_user.user_id,
                new_user.username,
                node_id,
                new_user.make_current as i32,
                new_user.client_id,
                now.to_rfc3339(),
            ],
        )?;

        let user = query_user(&tx, &new_user.user_id, &new_user.client_id)?;
        tx.commit()?;

        tracing::debug!(
            user_id = %user.user_id,
            client_id = %user.client_id,
            node_id = ?user.node_id,
            "local user registered"
        );
        Ok(user)
    }

    /// Return the client's node id, generating and back-filling one if needed.
    pub fn ensure_node_id(&self, client_id: &str) -> Result<String> {
        let tx = self.conn().unchecked_transaction()?;
        let node_id = resolve_node_id(&tx, client_id, Utc::now())?;
        tx.commit()?;
        Ok(node_id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_local_user(&self, user_id: &str, client_id: &str) -> Result<LocalUser> {
        query_user(self.conn(), user_id, client_id)
    }

    pub fn get_current_user(&self, client_id: &str) -> Result<Option<LocalUser>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM local_users
                     WHERE client_id = ?1 AND is_current = 1 LIMIT 1"
                ),
                params![client_id],
                row_to_user,
            )
            .optional()?)
    }

    pub fn list_local_users(&self, client_id: &str) -> Result<Vec<LocalUser>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM local_users WHERE client_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![client_id], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn list_users_for_node(&self, node_id: &str) -> Result<Vec<LocalUser>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM local_users WHERE node_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![node_id], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Whether `node_id` belongs to any user stored on this machine.
    pub fn is_local_node(&self, node_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM local_users WHERE node_id = ?1 LIMIT 1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Make `user_id` the current user of `client_id`; other clients are untouched.
    pub fn set_current_user(&self, client_id: &str, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn().unchecked_transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM local_users WHERE client_id = ?1 AND user_id = ?2",
                params![client_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "UPDATE local_users
             SET is_current = CASE WHEN user_id = ?1 THEN 1 ELSE 0 END, updated_at = ?2
             WHERE client_id = ?3",
            params![user_id, now, client_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record the groups a node was confirmed into.  `None` leaves a column as is.
    pub fn update_user_assignment(
        &self,
        node_id: &str,
        domain_id: Option<&str>,
        cluster_id: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE local_users SET
                domain_id  = COALESCE(?1, domain_id),
                cluster_id = COALESCE(?2, cluster_id),
                channel_id = COALESCE(?3, channel_id),
                updated_at = ?4
             WHERE node_id = ?5",
            params![domain_id, cluster_id, channel_id, Utc::now().to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }

    pub fn touch_local_users(&self, node_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE local_users SET updated_at = ?1 WHERE node_id = ?2",
            params![now.to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Administrative wipe of every local user.
    pub fn clear_local_users(&self) -> Result<usize> {
        let affected = self.conn().execute("DELETE FROM local_users", [])?;
        tracing::warn!(removed = affected, "local users cleared");
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick the client's existing node id (or mint one) and make every user of
/// that client carry it.
fn resolve_node_id(conn: &Connection, client_id: &str, now: DateTime<Utc>) -> Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT node_id FROM local_users
             WHERE client_id = ?1 AND node_id IS NOT NULL
             ORDER BY created_at ASC LIMIT 1",
            params![client_id],
            |row| row.get(0),
        )
        .optional()?;

    let node_id = existing.unwrap_or_else(generate_node_id);

    let backfilled = conn.execute(
        "UPDATE local_users SET node_id = ?1, updated_at = ?2
         WHERE client_id = ?3 AND (node_id IS NULL OR node_id != ?1)",
        params![node_id, now.to_rfc3339(), client_id],
    )?;
    if backfilled > 0 {
        tracing::info!(client_id, node_id = %node_id, backfilled, "back-filled node id onto local users");
    }

    Ok(node_id)
}

fn query_user(conn: &Connection, user_id: &str, client_id: &str) -> Result<LocalUser> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM local_users WHERE user_id = ?1 AND client_id = ?2"),
        params![user_id, client_id],
        row_to_user,
    )
    .map_err(crate::error::not_found)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalUser> {
    let is_current_int: i32 = row.get(6)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(LocalUser {
        user_id: row.get(0)?,
        username: row.get(1)?,
        node_id: row.get(2)?,
        domain_id: row.get(3)?,
        cluster_id: row.get(4)?,
        channel_id: row.get(5)?,
        is_current: is_current_int != 0,
        client_id: row.get(7)?,
        created_at: parse_timestamp(8, &created_str)?,
        updated_at: parse_timestamp(9, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(user_id: &str, client_id: &str, make_current: bool) -> NewLocalUser {
        NewLocalUser {
            user_id: user_id.into(),
            username: format!("{user_id}-name"),
            client_id: client_id.into(),
            make_current,
        }
    }

    #[test]
    fn test_users_of_one_client_share_a_node_id() {
        let db = Database::open_in_memory().unwrap();
        let a = db.add_local_user(&new_user("alice", "client-1", true)).unwrap();
        let b = db.add_local_user(&new_user("bob", "client-1", false)).unwrap();

        assert!(a.node_id.is_some());
        assert_eq!(a.node_id, b.node_id);

        let other = db.add_local_user(&new_user("carol", "client-2", true)).unwrap();
        assert_ne!(other.node_id, a.node_id);
    }

    #[test]
    fn test_missing_node_ids_are_backfilled() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now().to_rfc3339();
        for user in ["old-1", "old-2"] {
            db.conn()
                .execute(
                    "INSERT INTO local_users (user_id, username, is_current, client_id, created_at, updated_at)
                     VALUES (?1, ?1, 0, 'client-1', ?2, ?2)",
                    params![user, now],
                )
                .unwrap();
        }

        let added = db.add_local_user(&new_user("new", "client-1", false)).unwrap();
        let node_id = added.node_id.clone().unwrap();

        let users = db.list_local_users("client-1").unwrap();
        assert_eq!(users.len(), 3);
        assert!(users.iter().all(|u| u.node_id.as_deref() == Some(node_id.as_str())));
        assert_eq!(db.ensure_node_id("client-1").unwrap(), node_id);
    }

    #[test]
    fn test_current_user_is_scoped_per_client() {
        let db = Database::open_in_memory().unwrap();
        db.add_local_user(&new_user("alice", "client-1", true)).unwrap();
        db.add_local_user(&new_user("bob", "client-1", false)).unwrap();
        db.add_local_user(&new_user("carol", "client-2", true)).unwrap();

        db.set_current_user("client-1", "bob").unwrap();

        assert_eq!(db.get_current_user("client-1").unwrap().unwrap().user_id, "bob");
        assert_eq!(db.get_current_user("client-2").unwrap().unwrap().user_id, "carol");
        assert!(!db.get_local_user("alice", "client-1").unwrap().is_current);
        assert!(matches!(
            db.set_current_user("client-1", "nobody"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_assignment_only_overwrites_given_columns() {
        let db = Database::open_in_memory().unwrap();
        let user = db.add_local_user(&new_user("alice", "client-1", true)).unwrap();
        let node_id = user.node_id.unwrap();

        db.update_user_assignment(&node_id, Some("D1"), Some("C1"), None).unwrap();
        db.update_user_assignment(&node_id, None, None, Some("CH1")).unwrap();

        let user = db.get_local_user("alice", "client-1").unwrap();
        assert_eq!(user.domain_id.as_deref(), Some("D1"));
        assert_eq!(user.cluster_id.as_deref(), Some("C1"));
        assert_eq!(user.channel_id.as_deref(), Some("CH1"));
        assert!(db.is_local_node(&node_id).unwrap());
        assert!(!db.is_local_node("node_elsewhere").unwrap());
    }
}
