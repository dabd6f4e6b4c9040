use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{parse_timestamp, ChannelMemberNode};

impl Database {
    /// Insert a channel member.  Returns `false` when the node was already a
    /// member of that channel (the row is left untouched).
    pub fn insert_channel_member(&self, member: &ChannelMemberNode) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO channel_member_nodes
                (node_id, domain_id, cluster_id, channel_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                member.node_id,
                member.domain_id,
                member.cluster_id,
                member.channel_id,
                member.created_at.to_rfc3339(),
                member.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn list_channel_members(&self, channel_id: &str) -> Result<Vec<ChannelMemberNode>> {
        let mut stmt = self.conn().prepare(
            "SELECT node_id, domain_id, cluster_id, channel_id, created_at, updated_at
             FROM channel_member_nodes WHERE channel_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![channel_id], row_to_member)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_memberships_for_node(&self, node_id: &str) -> Result<Vec<ChannelMemberNode>> {
        let mut stmt = self.conn().prepare(
            "SELECT node_id, domain_id, cluster_id, channel_id, created_at, updated_at
             FROM channel_member_nodes WHERE node_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![node_id], row_to_member)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn touch_channel_members(&self, node_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE channel_member_nodes SET updated_at = ?1 WHERE node_id = ?2",
            params![now.to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelMemberNode> {
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(ChannelMemberNode {
        node_id: row.get(0)?,
        domain_id: row.get(1)?,
        cluster_id: row.get(2)?,
        channel_id: row.get(3)?,
        created_at: parse_timestamp(4, &created_str)?,
        updated_at: parse_timestamp(5, &updated_str)?,
    })
}
