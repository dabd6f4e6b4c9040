//! Types shared by every Canopy crate: the coordinator wire protocol,
//! hierarchy levels and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
