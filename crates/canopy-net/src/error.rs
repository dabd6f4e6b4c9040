use thiserror::Error;

use canopy_shared::ProtocolError;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link command channel closed")]
    ChannelClosed,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
