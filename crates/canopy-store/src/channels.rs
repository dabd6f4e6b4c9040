//! CRUD operations for [`ChannelMainNode`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{parse_timestamp, ChannelMainNode};

const CHANNEL_COLUMNS: &str =
    "node_id, domain_id, cluster_id, channel_id, status, member_count, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_channel_node(&self, node: &ChannelMainNode) -> Result<()> {
        insert_channel(self.conn(), node)
    }

    /// Clear the channel level and insert `node` as its only row.
    pub fn replace_channel_nodes(&self, node: &ChannelMainNode) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let cleared = tx.execute("DELETE FROM channel_main_nodes", [])?;
        insert_channel(&tx, node)?;
        tx.commit()?;
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_channel_node(&self, channel_id: &str) -> Result<ChannelMainNode> {
        self.conn()
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channel_main_nodes WHERE channel_id = ?1"),
                params![channel_id],
                row_to_channel,
            )
            .map_err(not_found)
    }

    pub fn find_channel_by_node(&self, node_id: &str) -> Result<Option<ChannelMainNode>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channel_main_nodes
                     WHERE node_id = ?1 ORDER BY id ASC LIMIT 1"
                ),
                params![node_id],
                row_to_channel,
            )
            .optional()?)
    }

    /// Channels belonging to `cluster_id`, in storage order.
    pub fn list_channels_in_cluster(&self, cluster_id: &str) -> Result<Vec<ChannelMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channel_main_nodes WHERE cluster_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![cluster_id], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    pub fn list_channels_for_node(&self, node_id: &str) -> Result<Vec<ChannelMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channel_main_nodes WHERE node_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![node_id], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    pub fn list_channel_nodes(&self) -> Result<Vec<ChannelMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channel_main_nodes ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Bump a channel's member count.  Returns `false` if the channel is not cached locally.
    pub fn increment_channel_member_count(&self, channel_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE channel_main_nodes
             SET member_count = member_count + 1, updated_at = ?1
             WHERE channel_id = ?2",
            params![now.to_rfc3339(), channel_id],
        )?;
        Ok(affected > 0)
    }

    pub fn touch_channel_nodes(&self, node_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE channel_main_nodes SET updated_at = ?1 WHERE node_id = ?2",
            params![now.to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_channel(conn: &Connection, node: &ChannelMainNode) -> Result<()> {
    conn.execute(
        "INSERT INTO channel_main_nodes
            (node_id, domain_id, cluster_id, channel_id, status, member_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            node.node_id,
            node.domain_id,
            node.cluster_id,
            node.channel_id,
            node.status,
            node.member_count,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Map a `rusqlite::Row` to a [`ChannelMainNode`].
fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelMainNode> {
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(ChannelMainNode {
        node_id: row.get(0)?,
        domain_id: row.get(1)?,
        cluster_id: row.get(2)?,
        channel_id: row.get(3)?,
        status: row.get(4)?,
        member_count: row.get(5)?,
        created_at: parse_timestamp(6, &created_str)?,
        updated_at: parse_timestamp(7, &updated_str)?,
    })
}
