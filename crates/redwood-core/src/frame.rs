//! Wire framing for subscription streams.
//!
//! A streamed subscription response is newline-delimited text. Each
//! meaningful line is a 5-character prefix (`data:`) followed by one JSON
//! update. Reads from the network land at arbitrary byte offsets, so
//! [`FrameDecoder`] buffers bytes until a full line is available. Lines are
//! split on raw bytes before UTF-8 decoding, which keeps multi-byte
//! characters intact when a read boundary falls inside one.
//!
//! Socket messages carry bare JSON payloads, possibly several per message
//! separated by newlines. See [`split_socket_message`].

use bytes::{Buf, BytesMut};

use crate::error::{CoreError, Result};
use crate::tx::UpdateMessage;

/// Length of the prefix stripped from every streamed frame.
pub const FRAME_PREFIX_LEN: usize = 5;

/// Incremental line splitter for a streamed response body.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its terminator.
    ///
    /// Returns `None` when only a partial line (or nothing) is buffered.
    pub fn next_line(&mut self) -> Option<Result<String>> {
        let idx = self.buffer.iter().position(|&b| b == b'\n')?;
        let line = self.buffer.split_to(idx);
        self.buffer.advance(1);
        Some(
            std::str::from_utf8(&line)
                .map(str::to_string)
                .map_err(CoreError::from),
        )
    }

    /// Pop and decode the next complete frame, skipping blank lines.
    pub fn next_frame(&mut self) -> Option<Result<UpdateMessage>> {
        loop {
            let line = match self.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if let Some(decoded) = decode_frame(&line).transpose() {
                return Some(decoded);
            }
        }
    }

    /// Bytes of an unterminated trailing line still held.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one streamed line.
///
/// Blank lines yield `Ok(None)`. Otherwise the fixed prefix is removed, the
/// rest trimmed, and parsed as JSON.
pub fn decode_frame(line: &str) -> Result<Option<UpdateMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let payload = line
        .get(FRAME_PREFIX_LEN..)
        .ok_or_else(|| CoreError::MalformedFrame(format!("frame too short: {line:?}")))?
        .trim();
    Ok(Some(serde_json::from_str(payload)?))
}

/// Decode every newline-separated JSON payload in one socket message.
///
/// Each payload decodes independently, so one bad payload does not hide the
/// others.
pub fn split_socket_message(text: &str) -> Vec<Result<UpdateMessage>> {
    text.split('\n')
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .map(|payload| serde_json::from_str(payload).map_err(CoreError::from))
        .collect()
}
