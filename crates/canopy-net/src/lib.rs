// Coordinator transport: one JSON-lines connection per client, driven as a tokio task.

pub mod error;
pub mod framing;
pub mod link;

pub use error::LinkError;
pub use framing::{decode_frame, encode_frame};
pub use link::{spawn_link, LinkCommand, LinkConfig, LinkHandle, LinkNotification};
