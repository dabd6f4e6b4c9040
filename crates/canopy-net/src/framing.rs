//! JSON-lines framing: one [`Envelope`] per `\n`-terminated line.

use canopy_shared::constants::MAX_FRAME_SIZE;
use canopy_shared::protocol::Envelope;

use crate::error::LinkError;

/// Encode an envelope as a single newline-terminated frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, LinkError> {
    let mut frame = envelope.to_json()?.into_bytes();
    if frame.len() >= MAX_FRAME_SIZE {
        return Err(LinkError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one received line.  Blank lines (keepalives) yield `Ok(None)`.
pub fn decode_frame(line: &str) -> Result<Option<Envelope>, LinkError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.len() >= MAX_FRAME_SIZE {
        return Err(LinkError::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(Some(Envelope::from_json(line)?))
}
