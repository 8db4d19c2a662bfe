//! Partial-frame assembly.
//!
//! Some gateways split one JSON message over several WebSocket frames.
//! Chunks are appended to a buffer and parsed after each append:
//! - parse succeeds: the message is complete and the buffer is cleared
//! - parse fails at end of input: the message is partial, keep buffering
//! - any other parse failure: the buffer is corrupt and is discarded
//!
//! Binary chunks may end inside a multi-byte UTF-8 sequence; the incomplete
//! tail is carried over to the next chunk.

use serde_json::Value;

/// Default cap on buffered bytes before a pending frame is discarded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// Result of feeding one chunk to the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Complete(Value),
    /// More data is needed; the chunk is buffered.
    Partial,
    /// Buffer discarded (corrupt payload or size cap exceeded).
    Dropped,
}

/// Buffers chunks until they form one complete JSON value.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: String,
    /// Incomplete UTF-8 sequence at the end of the last binary chunk.
    carry: Vec<u8>,
    max_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            carry: Vec::new(),
            max_bytes,
        }
    }

    pub fn push(&mut self, chunk: &str) -> FrameOutcome {
        if !self.carry.is_empty() {
            return self.push_bytes(chunk.as_bytes());
        }
        self.buffer.push_str(chunk);

        if self.buffer.len() > self.max_bytes {
            self.reset();
            return FrameOutcome::Dropped;
        }

        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(value) => {
                self.buffer.clear();
                FrameOutcome::Complete(value)
            }
            Err(e) if e.is_eof() => FrameOutcome::Partial,
            Err(_) => {
                self.reset();
                FrameOutcome::Dropped
            }
        }
    }

    /// Feed a binary chunk.
    ///
    /// A chunk ending in an incomplete UTF-8 sequence is partial; invalid
    /// UTF-8 drops the whole buffer.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> FrameOutcome {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let (text, tail) = match std::str::from_utf8(&bytes) {
            Ok(text) => (text, &[][..]),
            Err(e) if e.error_len().is_none() => {
                let (head, tail) = bytes.split_at(e.valid_up_to());
                match std::str::from_utf8(head) {
                    Ok(text) => (text, tail),
                    Err(_) => {
                        self.reset();
                        return FrameOutcome::Dropped;
                    }
                }
            }
            Err(_) => {
                self.reset();
                return FrameOutcome::Dropped;
            }
        };

        if tail.is_empty() {
            return self.push(text);
        }

        self.buffer.push_str(text);
        self.carry = tail.to_vec();
        if self.buffered_len() > self.max_bytes {
            self.reset();
            return FrameOutcome::Dropped;
        }
        FrameOutcome::Partial
    }

    /// Bytes currently held waiting for the rest of a message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.carry.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.carry.clear();
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_message() {
        let mut frames = FrameAssembler::default();
        assert_eq!(
            frames.push(r#"{"spreads":{"BTC-USD":4.2}}"#),
            FrameOutcome::Complete(json!({"spreads": {"BTC-USD": 4.2}}))
        );
        assert_eq!(frames.buffered_len(), 0);
    }

    #[test]
    fn test_split_message_is_partial_then_complete() {
        let mut frames = FrameAssembler::default();

        assert_eq!(frames.push(r#"{"latency":{"p50":25,"#), FrameOutcome::Partial);
        assert!(frames.buffered_len() > 0);

        assert_eq!(
            frames.push(r#""p95":60}}"#),
            FrameOutcome::Complete(json!({"latency": {"p50": 25, "p95": 60}}))
        );
        assert_eq!(frames.buffered_len(), 0);
    }

    #[test]
    fn test_corrupt_payload_is_dropped_and_buffer_cleared() {
        let mut frames = FrameAssembler::default();

        assert_eq!(frames.push("not json"), FrameOutcome::Dropped);
        assert_eq!(frames.buffered_len(), 0);

        // The next message parses on its own.
        assert_eq!(frames.push(r#"{"ok":true}"#), FrameOutcome::Complete(json!({"ok": true})));
    }

    #[test]
    fn test_partial_followed_by_garbage_is_dropped() {
        let mut frames = FrameAssembler::default();
        assert_eq!(frames.push(r#"{"a":"#), FrameOutcome::Partial);
        assert_eq!(frames.push("}}}"), FrameOutcome::Dropped);
        assert_eq!(frames.buffered_len(), 0);
    }

    #[test]
    fn test_size_cap_drops_pending_frame() {
        let mut frames = FrameAssembler::new(16);
        assert_eq!(frames.push(r#"{"a":""#), FrameOutcome::Partial);
        assert_eq!(frames.push("aaaaaaaaaaaaaaaaaaaa"), FrameOutcome::Dropped);
        assert_eq!(frames.buffered_len(), 0);
    }

    #[test]
    fn test_binary_split_inside_multibyte_char() {
        let payload = r#"{"venue":"é"}"#.as_bytes();
        let cut = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut frames = FrameAssembler::default();

        assert_eq!(frames.push_bytes(&payload[..cut]), FrameOutcome::Partial);
        assert!(frames.buffered_len() > 0);
        assert_eq!(
            frames.push_bytes(&payload[cut..]),
            FrameOutcome::Complete(json!({"venue": "é"}))
        );
        assert_eq!(frames.buffered_len(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        let mut frames = FrameAssembler::default();
        assert_eq!(frames.push_bytes(&[b'{', 0xFF, b'}']), FrameOutcome::Dropped);
        assert_eq!(frames.buffered_len(), 0);

        assert_eq!(frames.push_bytes(br#"{"ok":1}"#), FrameOutcome::Complete(json!({"ok": 1})));
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut frames = FrameAssembler::default();
        frames.push(r#"{"a":"#);
        frames.reset();
        assert_eq!(frames.push(r#"{"b":2}"#), FrameOutcome::Complete(json!({"b": 2})));
    }
}
