//! # canopy-client
//!
//! Client node of the Canopy overlay.
//!
//! A client keeps a local registry of the domain → cluster → channel groups
//! it belongs to and answers the coordinator's hierarchy commands. It also
//! carries out session handoff: applying an auto-login session to a target
//! site, and tearing that session down again on logout.
//!
//! The [`router::Router`] ties it together: it consumes link notifications
//! and hands each envelope to the [`hierarchy::NodeHierarchyCoordinator`] or
//! the [`auth::AuthSessionCoordinator`].

pub mod auth;
pub mod browser;
pub mod capacity;
pub mod config;
pub mod dedup;
pub mod error;
pub mod hierarchy;
pub mod outbound;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;

pub use config::ClientConfig;
pub use registry::NodeRegistry;
pub use router::Router;
pub use state::ClientState;
