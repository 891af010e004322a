//! Newline-delimited JSON framing.
//!
//! One frame per line. `serde_json` escapes control characters inside
//! strings, so an encoded frame never contains a raw `\n`.

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    errors::{ProtocolError, Result},
    limits::MAX_FRAME_SIZE,
    messages::{ClientFrame, ServerFrame},
};

/// Encode a frame as one line, terminator included.
///
/// # Errors
///
/// - `FrameTooLarge` if the encoded frame exceeds [`MAX_FRAME_SIZE`]
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)?;
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: line.len(), max: MAX_FRAME_SIZE });
    }
    line.push(b'\n');
    Ok(line)
}

/// Decode a line received by the relay.
pub fn decode_client_frame(line: &[u8]) -> Result<ClientFrame> {
    decode_line(line)
}

/// Decode a line received by a client.
pub fn decode_server_frame(line: &[u8]) -> Result<ServerFrame> {
    decode_line(line)
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    let line = trim_terminator(line);
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: line.len(), max: MAX_FRAME_SIZE });
    }
    Ok(serde_json::from_slice(line)?)
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
