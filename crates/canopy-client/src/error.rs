use thiserror::Error;

use canopy_shared::ProtocolError;
use canopy_store::StoreError;

/// Failures reaching the shared node registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Registry lock poisoned")]
    Poisoned,
}

/// Why a node hierarchy command could not be carried out.
///
/// The `Display` text is what the coordinator sees in the `error` field.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Missing or malformed input. Not worth retrying.
    #[error("{0}")]
    Validation(String),

    /// Entity missing or node id mismatch. The caller must not retry blindly.
    #[error("{0}")]
    Precondition(String),

    #[error("Storage error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<ProtocolError> for CommandError {
    fn from(e: ProtocolError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Registry(RegistryError::Store(e))
    }
}

/// Failures inside the browsing-context collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Surface not found: {0}")]
    SurfaceNotFound(u64),

    #[error("No browsing surface available")]
    NoSurface,

    #[error("Browser operation failed: {0}")]
    Operation(String),
}
