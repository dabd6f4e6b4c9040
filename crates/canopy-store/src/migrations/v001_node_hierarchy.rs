//! v001 -- Node hierarchy schema.
//!
//! Creates the five core tables: `domain_main_nodes`, `cluster_main_nodes`,
//! `channel_main_nodes`, `channel_member_nodes` and `local_users`.  Field
//! names are the on-disk contract shared with other client builds.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Domain main nodes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS domain_main_nodes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id      TEXT NOT NULL,
    domain_id    TEXT NOT NULL UNIQUE,
    status       TEXT NOT NULL DEFAULT 'active',
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,                -- RFC-3339
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_domain_main_nodes_node ON domain_main_nodes(node_id);

-- ----------------------------------------------------------------
-- Cluster main nodes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cluster_main_nodes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id      TEXT NOT NULL,
    domain_id    TEXT NOT NULL,
    cluster_id   TEXT NOT NULL UNIQUE,
    status       TEXT NOT NULL DEFAULT 'active',
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cluster_main_nodes_domain ON cluster_main_nodes(domain_id);
CREATE INDEX IF NOT EXISTS idx_cluster_main_nodes_node ON cluster_main_nodes(node_id);

-- ----------------------------------------------------------------
-- Channel main nodes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel_main_nodes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id      TEXT NOT NULL,
    domain_id    TEXT NOT NULL,
    cluster_id   TEXT NOT NULL,
    channel_id   TEXT NOT NULL UNIQUE,
    status       TEXT NOT NULL DEFAULT 'active',
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_channel_main_nodes_cluster ON channel_main_nodes(cluster_id);
CREATE INDEX IF NOT EXISTS idx_channel_main_nodes_node ON channel_main_nodes(node_id);

-- ----------------------------------------------------------------
-- Channel member nodes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel_member_nodes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id    TEXT NOT NULL,
    domain_id  TEXT NOT NULL,
    cluster_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (node_id, channel_id)
);

CREATE INDEX IF NOT EXISTS idx_channel_member_nodes_channel ON channel_member_nodes(channel_id);

-- ----------------------------------------------------------------
-- Local users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_users (
    user_id    TEXT NOT NULL,
    username   TEXT NOT NULL,
    node_id    TEXT,                            -- back-filled per client
    domain_id  TEXT,
    cluster_id TEXT,
    channel_id TEXT,
    is_current INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1, scoped to client_id
    client_id  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, client_id)
);

CREATE INDEX IF NOT EXISTS idx_local_users_client ON local_users(client_id);
CREATE INDEX IF NOT EXISTS idx_local_users_node ON local_users(node_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
