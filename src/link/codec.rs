//! Envelope codec for the control link wire format.
//!
//! Every message travels as one self-describing JSON envelope:
//! `{"kind": "<type tag>", "body": {…fields…}}`. The envelope carries enough
//! type information for the receiver to rebuild the exact message variant,
//! including fields a richer variant adds next to the base `sender`.
//!
//! An earlier protocol revision terminated frames with an `<EOF>` sentinel.
//! The current revision needs no delimiter (a frame ends where its JSON
//! value ends), but decoding still tolerates a trailing sentinel and the NUL
//! padding left by fixed-size receive buffers.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::error::{LinkError, Result};
use crate::link::messages::Message;

/// Legacy frame terminator, accepted on decode, never emitted on encode.
pub const EOF_SENTINEL: &str = "<EOF>";

/// Self-describing wire envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: String,
    body: Value,
}

/// Encode a message into its envelope text.
pub fn encode<M: Message>(message: &M) -> Result<String> {
    let envelope = Envelope {
        kind: M::KIND.to_string(),
        body: serde_json::to_value(message)?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode envelope text into the expected message type.
///
/// Fails with `TypeMismatch` when the envelope tag names a different type,
/// and with `MalformedMessage` when the text is not a well-formed envelope
/// of that type.
pub fn decode<M: Message>(text: &str) -> Result<M> {
    let frame = trim_frame(text);
    if frame.is_empty() {
        return Err(LinkError::MalformedMessage("empty frame".to_string()));
    }

    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| LinkError::MalformedMessage(e.to_string()))?;

    if envelope.kind != M::KIND {
        return Err(LinkError::TypeMismatch {
            expected: M::KIND,
            found: envelope.kind,
        });
    }

    serde_json::from_value(envelope.body).map_err(|e| LinkError::MalformedMessage(e.to_string()))
}

/// Whether `text` currently holds one full, well-formed envelope.
///
/// For callers that accumulate their own receive buffers. The server's
/// receive path applies the same completeness rule through [`FrameCodec`].
pub fn is_complete_frame(text: &str) -> bool {
    let frame = trim_frame(text);
    !frame.is_empty() && serde_json::from_str::<Envelope>(frame).is_ok()
}

/// Strip NUL padding, whitespace, and a trailing legacy sentinel.
fn trim_frame(text: &str) -> &str {
    let padding = |c: char| c == '\0' || c.is_whitespace();
    let mut frame = text.trim_matches(padding);
    if let Some(stripped) = frame.strip_suffix(EOF_SENTINEL) {
        frame = stripped.trim_end_matches(padding);
    }
    frame
}

/// Stream decoder yielding one envelope text per complete frame.
///
/// Accumulates bytes until they hold a full envelope, then hands the frame
/// text out and drops it from the buffer. Sentinel bytes and padding between
/// frames are skipped, so both protocol revisions decode.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec with the default max frame length (16 MB).
    pub fn new() -> Self {
        Self {
            max_length: 16 * 1024 * 1024,
        }
    }

    /// Create a codec with a custom max frame length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Get the max frame length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the inter-frame noise (padding, sentinel) at the front of `src`.
///
/// The second value is true when the buffer ends in a partial sentinel,
/// meaning more bytes are needed before anything can be parsed.
fn leading_noise_len(src: &[u8]) -> (usize, bool) {
    let sentinel = EOF_SENTINEL.as_bytes();
    let mut idx = 0;
    loop {
        match src.get(idx) {
            Some(b'\0' | b' ' | b'\t' | b'\r' | b'\n') => idx += 1,
            Some(b'<') => {
                let rest = &src[idx..];
                if rest.starts_with(sentinel) {
                    idx += sentinel.len();
                } else if sentinel.starts_with(rest) {
                    // A sentinel split across reads; wait for its tail.
                    return (idx, true);
                } else {
                    return (idx, false);
                }
            }
            _ => return (idx, false),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        let (noise, split_sentinel) = leading_noise_len(src);
        if noise > 0 {
            src.advance(noise);
        }
        if split_sentinel || src.is_empty() {
            return Ok(None);
        }

        // A read may end mid-way through a UTF-8 sequence; parse only the
        // complete prefix and wait for the rest.
        let valid_len = match std::str::from_utf8(src) {
            Ok(_) => src.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Frame is not UTF-8: {}", e),
                ));
            }
        };
        let text = std::str::from_utf8(&src[..valid_len]).unwrap_or_default();

        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Envelope>();
        match stream.next() {
            Some(Ok(_)) => {
                let end = stream.byte_offset();
                if end > self.max_length {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Frame too large: {} > {}", end, self.max_length),
                    ));
                }
                let frame = text[..end].to_string();
                src.advance(end);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > self.max_length {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Frame too large: {} > {}", src.len(), self.max_length),
                    ));
                }
                Ok(None)
            }
            Some(Err(e)) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Corrupt frame: {}", e),
            )),
            None => Ok(None),
        }
    }
}
