//! SL030 wire protocol.
//!
//! Requests are sent as:
//! [LEN] [CMD] [PAYLOAD...]
//!
//! with `LEN = 1 + payload length`. Responses come back as:
//! [LEN] [CMD] [STATUS] [DATA...]
//!
//! The module sets the high bit of transmitted bytes as a flag, so every
//! received byte is masked with 0x7F before any field is read.

use tracing::trace;

use crate::error::{ReaderError, Result};

/// SL030 command codes
pub mod commands {
    pub const SELECT: u8 = 0x01;
    pub const SLEEP: u8 = 0x50;
}

/// SL030 status codes
pub mod status {
    pub const SUCCESS: u8 = 0x00;
}

/// Largest payload that keeps the length prefix within one byte
pub const MAX_PAYLOAD_LEN: usize = 254;

/// Bytes requested from the bus for every response
pub const MAX_RESPONSE_LEN: usize = 256;

const MSB_MASK: u8 = 0x7F;

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command: u8,
    pub status: u8,
    pub data: Vec<u8>,
}

/// Encode a request frame. No masking is applied on the way out.
pub fn encode(command: u8, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_PAYLOAD_LEN {
        return Err(ReaderError::PayloadTooLarge(data.len()));
    }

    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push((1 + data.len()) as u8);
    frame.push(command);
    frame.extend_from_slice(data);
    Ok(frame)
}

/// Decode a raw response, clearing bit 7 of every byte first.
///
/// The first cleaned byte is trusted as the frame length; trailing bytes
/// past it (bus padding) are ignored.
pub fn decode(raw: &[u8]) -> Result<Response> {
    let clean: Vec<u8> = raw.iter().map(|b| b & MSB_MASK).collect();

    let length = *clean.first().ok_or(ReaderError::ShortFrame {
        expected: 1,
        actual: 0,
    })? as usize;

    // Command and status are always read, even if LEN claims less.
    let end = (length + 1).max(3);
    if clean.len() < end {
        return Err(ReaderError::ShortFrame {
            expected: end,
            actual: clean.len(),
        });
    }

    let response = Response {
        command: clean[1],
        status: clean[2],
        data: clean[3..end].to_vec(),
    };
    trace!(?response, "decoded frame");
    Ok(response)
}

#[cfg(test)]
pub(crate) fn response_frame(command: u8, status: u8, data: &[u8]) -> Vec<u8> {
    let mut raw = vec![(2 + data.len()) as u8, command, status];
    raw.extend_from_slice(data);
    raw
}
