//! # canopy-store
//!
//! Local node registry for a Canopy client, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for the five
//! hierarchy tables (domain, cluster and channel main nodes, channel
//! members, local users) plus the session-state tables used by the
//! login/logout flows.

pub mod channels;
pub mod clusters;
pub mod database;
pub mod domains;
pub mod members;
pub mod migrations;
pub mod models;
pub mod session;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
