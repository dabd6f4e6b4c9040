//! CRUD operations for [`DomainMainNode`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{parse_timestamp, DomainMainNode};

const DOMAIN_COLUMNS: &str = "node_id, domain_id, status, member_count, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new domain main node.
    pub fn insert_domain_node(&self, node: &DomainMainNode) -> Result<()> {
        self.conn().execute(
            "INSERT INTO domain_main_nodes
                (node_id, domain_id, status, member_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.node_id,
                node.domain_id,
                node.status,
                node.member_count,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Replace every cached domain row with `node`, atomically.
    ///
    /// Returns the number of rows that were cleared.
    pub fn replace_domain_nodes(&self, node: &DomainMainNode) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let cleared = tx.execute("DELETE FROM domain_main_nodes", [])?;
        tx.execute(
            "INSERT INTO domain_main_nodes
                (node_id, domain_id, status, member_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.node_id,
                node.domain_id,
                node.status,
                node.member_count,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a domain by its id.
    pub fn get_domain_node(&self, domain_id: &str) -> Result<DomainMainNode> {
        self.conn()
            .query_row(
                &format!("SELECT {DOMAIN_COLUMNS} FROM domain_main_nodes WHERE domain_id = ?1"),
                params![domain_id],
                row_to_domain,
            )
            .map_err(not_found)
    }

    /// The first domain whose main node is `node_id`, if any.
    pub fn find_domain_by_node(&self, node_id: &str) -> Result<Option<DomainMainNode>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {DOMAIN_COLUMNS} FROM domain_main_nodes
                     WHERE node_id = ?1 ORDER BY id ASC LIMIT 1"
                ),
                params![node_id],
                row_to_domain,
            )
            .optional()?)
    }

    /// All cached domains in insertion order.
    pub fn list_domain_nodes(&self) -> Result<Vec<DomainMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domain_main_nodes ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_domain)?;

        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?);
        }
        Ok(domains)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Set `updated_at` on every domain row owned by `node_id`.
    pub fn touch_domain_nodes(&self, node_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE domain_main_nodes SET updated_at = ?1 WHERE node_id = ?2",
            params![now.to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_domain(row: &rusqlite::Row<'_>) -> rusqlite::Result<DomainMainNode> {
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(DomainMainNode {
        node_id: row.get(0)?,
        domain_id: row.get(1)?,
        status: row.get(2)?,
        member_count: row.get(3)?,
        created_at: parse_timestamp(4, &created_str)?,
        updated_at: parse_timestamp(5, &updated_str)?,
    })
}
