//! Incremental decoder for newline-delimited JSON reply streams.
//!
//! Chunks may end anywhere, including in the middle of a frame or of a
//! multi-byte character. Complete lines are parsed as they arrive and the
//! unterminated tail is kept until the next chunk or [`FrameDecoder::finish`].
//! Lines that are blank or not valid JSON are dropped.

use crate::protocol::Frame;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Text after the last newline seen so far.
    buffer: String,
    /// Leading bytes of a UTF-8 sequence cut off by a chunk boundary.
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(chunk);
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);
        complete.split('\n').filter_map(parse_frame).collect()
    }

    /// Feed raw body bytes, decoding UTF-8 across chunk boundaries.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let text = self.decode_utf8(chunk);
        self.feed(&text)
    }

    /// Flush whatever the stream left without a trailing newline.
    ///
    /// Returns the final frame if the leftover text is valid JSON. The
    /// decoder is empty afterwards and can be reused.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&pending));
        }

        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&rest)
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        text
    }
}

fn parse_frame(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(value) => {
            let frame = Frame::from_value(&value);
            if frame.is_empty() {
                tracing::trace!("frame carries no recognised fields");
            }
            Some(frame)
        }
        Err(err) => {
            tracing::trace!(error = %err, "dropping malformed frame");
            None
        }
    }
}
