//! v002 -- Session state: logout flags, user activity cache and sync records.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Standing logout flags; auto-login is refused while one exists
CREATE TABLE IF NOT EXISTS logout_flags (
    user_id    TEXT PRIMARY KEY NOT NULL,
    client_id  TEXT NOT NULL,
    flagged_at TEXT NOT NULL                   -- RFC-3339
);

-- Cached per-user session activity, wiped by the logout flow
CREATE TABLE IF NOT EXISTS user_activity (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    site_name  TEXT NOT NULL,
    activity   TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_activity_user ON user_activity(user_id);

-- Opaque synchronization records pushed by the coordinator
CREATE TABLE IF NOT EXISTS sync_data (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_key   TEXT NOT NULL,
    payload    TEXT NOT NULL,                  -- JSON
    created_at TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
