//! CRUD operations for [`ClusterMainNode`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{parse_timestamp, ClusterMainNode};

const CLUSTER_COLUMNS: &str =
    "node_id, domain_id, cluster_id, status, member_count, created_at, updated_at";

impl Database {
    pub fn insert_cluster_node(&self, node: &ClusterMainNode) -> Result<()> {
        insert_cluster(self.conn(), node)
    }

    /// Clear the cluster level and insert `node` as its only row.
    pub fn replace_cluster_nodes(&self, node: &ClusterMainNode) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let cleared = tx.execute("DELETE FROM cluster_main_nodes", [])?;
        insert_cluster(&tx, node)?;
        tx.commit()?;
        Ok(cleared)
    }

    pub fn get_cluster_node(&self, cluster_id: &str) -> Result<ClusterMainNode> {
        self.conn()
            .query_row(
                &format!("SELECT {CLUSTER_COLUMNS} FROM cluster_main_nodes WHERE cluster_id = ?1"),
                params![cluster_id],
                row_to_cluster,
            )
            .map_err(not_found)
    }

    pub fn find_cluster_by_node(&self, node_id: &str) -> Result<Option<ClusterMainNode>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CLUSTER_COLUMNS} FROM cluster_main_nodes
                     WHERE node_id = ?1 ORDER BY id ASC LIMIT 1"
                ),
                params![node_id],
                row_to_cluster,
            )
            .optional()?)
    }

    /// Clusters belonging to `domain_id`, in storage order.
    pub fn list_clusters_in_domain(&self, domain_id: &str) -> Result<Vec<ClusterMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM cluster_main_nodes WHERE domain_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![domain_id], row_to_cluster)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_clusters_for_node(&self, node_id: &str) -> Result<Vec<ClusterMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM cluster_main_nodes WHERE node_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![node_id], row_to_cluster)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_cluster_nodes(&self) -> Result<Vec<ClusterMainNode>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM cluster_main_nodes ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_cluster)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn touch_cluster_nodes(&self, node_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE cluster_main_nodes SET updated_at = ?1 WHERE node_id = ?2",
            params![now.to_rfc3339(), node_id],
        )?;
        Ok(affected)
    }
}

fn insert_cluster(conn: &Connection, node: &ClusterMainNode) -> Result<()> {
    conn.execute(
        "INSERT INTO cluster_main_nodes
            (node_id, domain_id, cluster_id, status, member_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            node.node_id,
            node.domain_id,
            node.cluster_id,
            node.status,
            node.member_count,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_cluster(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterMainNode> {
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(ClusterMainNode {
        node_id: row.get(0)?,
        domain_id: row.get(1)?,
        cluster_id: row.get(2)?,
        status: row.get(3)?,
        member_count: row.get(4)?,
        created_at: parse_timestamp(5, &created_str)?,
        updated_at: parse_timestamp(6, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STATUS_ACTIVE;

    fn cluster(node_id: &str, domain_id: &str, cluster_id: &str, members: i64) -> ClusterMainNode {
        let now = Utc::now();
        ClusterMainNode {
            node_id: node_id.into(),
            domain_id: domain_id.into(),
            cluster_id: cluster_id.into(),
            status: STATUS_ACTIVE.into(),
            member_count: members,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_list_is_scoped_to_domain() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cluster_node(&cluster("N1", "D1", "C1", 3)).unwrap();
        db.insert_cluster_node(&cluster("N2", "D1", "C2", 5)).unwrap();
        db.insert_cluster_node(&cluster("N3", "D2", "C3", 0)).unwrap();

        let in_d1 = db.list_clusters_in_domain("D1").unwrap();
        assert_eq!(in_d1.len(), 2);
        assert_eq!(in_d1[0].cluster_id, "C1");
        assert_eq!(db.list_clusters_in_domain("D9").unwrap().len(), 0);
    }

    #[test]
    fn test_replace_clears_the_level() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cluster_node(&cluster("N1", "D1", "C1", 3)).unwrap();
        db.insert_cluster_node(&cluster("N2", "D1", "C2", 5)).unwrap();

        db.replace_cluster_nodes(&cluster("N9", "D1", "C9", 1)).unwrap();

        let all = db.list_cluster_nodes().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cluster_id, "C9");
    }

    #[test]
    fn test_touch_updates_only_matching_rows() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cluster_node(&cluster("N1", "D1", "C1", 0)).unwrap();
        db.insert_cluster_node(&cluster("N2", "D1", "C2", 0)).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(db.touch_cluster_nodes("N1", later).unwrap(), 1);
        assert!(db.get_cluster_node("C1").unwrap().updated_at > db.get_cluster_node("C2").unwrap().updated_at);
    }
}
