//! Records persisted in the local node registry.
//!
//! Every struct derives `Serialize` so it can be returned verbatim inside a
//! command response (e.g. `get_node_status`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status written for groups this client creates or confirms.
pub const STATUS_ACTIVE: &str = "active";

// ---------------------------------------------------------------------------
// Main nodes
// ---------------------------------------------------------------------------

/// The main node of a domain, as known locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainMainNode {
    pub node_id: String,
    pub domain_id: String,
    pub status: String,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The main node of a cluster inside a domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMainNode {
    pub node_id: String,
    pub domain_id: String,
    pub cluster_id: String,
    pub status: String,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The main node of a channel inside a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMainNode {
    pub node_id: String,
    pub domain_id: String,
    pub cluster_id: String,
    pub channel_id: String,
    pub status: String,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Channel members
// ---------------------------------------------------------------------------

/// A plain (non-main) member of a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMemberNode {
    pub node_id: String,
    pub domain_id: String,
    pub cluster_id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Local users
// ---------------------------------------------------------------------------

/// A user registered on this machine.
///
/// `is_current` is scoped per `client_id`: several client processes sharing
/// one database may each have a different current user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: String,
    pub username: String,
    pub node_id: Option<String>,
    pub domain_id: Option<String>,
    pub cluster_id: Option<String>,
    pub channel_id: Option<String>,
    pub is_current: bool,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`Database::add_local_user`](crate::Database::add_local_user).
#[derive(Debug, Clone)]
pub struct NewLocalUser {
    pub user_id: String,
    pub username: String,
    pub client_id: String,
    /// Make this the client's current user, clearing the flag on the others.
    pub make_current: bool,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// One cached activity entry for a user on a target site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserActivity {
    pub id: i64,
    pub user_id: String,
    pub site_name: String,
    pub activity: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(col: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}
