//! AWS event-stream binary framing (`application/vnd.amazon.eventstream`).
//!
//! Frame layout: 4-byte total length, 4-byte headers length, 4-byte prelude
//! CRC, headers, payload, 4-byte message CRC. All integers are big-endian.
//! Both CRCs are CRC-32 (IEEE): the prelude CRC covers the first 8 bytes, the
//! message CRC covers everything before it.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStreamMessage {
    /// String-valued headers (`:message-type`, `:event-type`, ...)
    pub headers: HashMap<String, String>,
    /// Raw payload
    pub payload: Bytes,
}

impl EventStreamMessage {
    /// `:message-type` header
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(":message-type").map(String::as_str)
    }

    /// `:event-type` header
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get(":event-type").map(String::as_str)
    }

    /// `:exception-type` header
    #[must_use]
    pub fn exception_type(&self) -> Option<&str> {
        self.headers.get(":exception-type").map(String::as_str)
    }
}

/// Framing violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStreamError {
    /// Total length smaller than the fixed overhead
    #[error("frame length {0} is shorter than the minimum frame")]
    FrameTooShort(usize),
    /// Total length over the configured ceiling
    #[error("frame length {length} exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Declared length
        length: usize,
        /// Ceiling
        limit: usize,
    },
    /// Headers overrun the frame
    #[error("headers length {headers} does not fit frame of {total} bytes")]
    HeadersOverrun {
        /// Declared headers length
        headers: usize,
        /// Declared frame length
        total: usize,
    },
    /// A header could not be decoded
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),
    /// Prelude or message CRC does not match the bytes received
    #[error("{section} checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// `prelude` or `message`
        section: &'static str,
        /// CRC carried by the frame
        expected: u32,
        /// CRC of the received bytes
        actual: u32,
    },
}

/// Incremental frame decoder
#[derive(Debug)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl EventStreamDecoder {
    /// Create a decoder rejecting frames longer than `max_frame_len`
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes and decode every complete frame.
    ///
    /// # Errors
    /// Returns the first framing violation; the decoder is unusable afterwards
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<EventStreamMessage>, EventStreamError> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        while self.buffer.len() >= PRELUDE_LEN {
            verify_crc("prelude", &self.buffer[..8], &self.buffer[8..PRELUDE_LEN])?;
            let total = read_u32(&self.buffer[0..4]);
            let headers_len = read_u32(&self.buffer[4..8]);

            if total < MIN_FRAME_LEN {
                return Err(EventStreamError::FrameTooShort(total));
            }
            if total > self.max_frame_len {
                return Err(EventStreamError::FrameTooLarge {
                    length: total,
                    limit: self.max_frame_len,
                });
            }
            if headers_len > total - MIN_FRAME_LEN {
                return Err(EventStreamError::HeadersOverrun {
                    headers: headers_len,
                    total,
                });
            }
            if self.buffer.len() < total {
                break;
            }

            verify_crc("message", &self.buffer[..total - 4], &self.buffer[total - 4..total])?;

            let mut frame = self.buffer.split_to(total).freeze();
            frame.advance(PRELUDE_LEN);
            let headers_bytes = frame.split_to(headers_len);
            let payload = frame.split_to(total - MIN_FRAME_LEN - headers_len);

            messages.push(EventStreamMessage {
                headers: parse_headers(&headers_bytes)?,
                payload,
            });
        }
        Ok(messages)
    }
}

fn read_be(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_be_bytes(word)
}

fn read_u32(bytes: &[u8]) -> usize {
    read_be(bytes) as usize
}

fn verify_crc(section: &'static str, covered: &[u8], crc: &[u8]) -> Result<(), EventStreamError> {
    let expected = read_be(crc);
    let actual = crc32fast::hash(covered);
    if expected != actual {
        return Err(EventStreamError::ChecksumMismatch {
            section,
            expected,
            actual,
        });
    }
    Ok(())
}

fn parse_headers(mut bytes: &[u8]) -> Result<HashMap<String, String>, EventStreamError> {
    let mut headers = HashMap::new();

    while bytes.has_remaining() {
        let name_len = usize::from(bytes.get_u8());
        if bytes.remaining() < name_len + 1 {
            return Err(EventStreamError::MalformedHeader("name overruns headers"));
        }
        let name = String::from_utf8_lossy(&bytes[..name_len]).into_owned();
        bytes.advance(name_len);

        let value_type = bytes.get_u8();
        let fixed = match value_type {
            0 | 1 => Some(0),
            2 => Some(1),
            3 => Some(2),
            4 => Some(4),
            5 | 8 => Some(8),
            9 => Some(16),
            6 | 7 => None,
            _ => return Err(EventStreamError::MalformedHeader("unknown value type")),
        };

        match fixed {
            Some(len) => {
                if bytes.remaining() < len {
                    return Err(EventStreamError::MalformedHeader("value overruns headers"));
                }
                bytes.advance(len);
            }
            None => {
                if bytes.remaining() < 2 {
                    return Err(EventStreamError::MalformedHeader("missing value length"));
                }
                let len = usize::from(bytes.get_u16());
                if bytes.remaining() < len {
                    return Err(EventStreamError::MalformedHeader("value overruns headers"));
                }
                if value_type == 7 {
                    headers.insert(name, String::from_utf8_lossy(&bytes[..len]).into_owned());
                }
                bytes.advance(len);
            }
        }
    }
    Ok(headers)
}

/// Encode a frame with string headers
#[must_use]
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(u8::try_from(name.len()).unwrap_or(u8::MAX));
        header_bytes.extend_from_slice(&name.as_bytes()[..name.len().min(255)]);
        header_bytes.push(7);
        let len = u16::try_from(value.len()).unwrap_or(u16::MAX);
        header_bytes.extend_from_slice(&len.to_be_bytes());
        header_bytes.extend_from_slice(&value.as_bytes()[..usize::from(len)]);
    }

    let total = MIN_FRAME_LEN + header_bytes.len() + payload.len();
    let total_u32 = u32::try_from(total).unwrap_or(u32::MAX);
    let headers_u32 = u32::try_from(header_bytes.len()).unwrap_or(u32::MAX);

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&total_u32.to_be_bytes());
    frame.extend_from_slice(&headers_u32.to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, payload: &str) -> Vec<u8> {
        encode_frame(
            &[
                (":message-type", "event"),
                (":event-type", event_type),
                (":content-type", "application/json"),
            ],
            payload.as_bytes(),
        )
    }

    #[test]
    fn test_decodes_frames_split_anywhere() {
        let mut bytes = event("messageStart", r#"{"role":"assistant"}"#);
        bytes.extend(event("contentBlockDelta", r#"{"delta":{"text":"Hi"}}"#));

        for split in [1, 5, 12, 20, bytes.len() - 1] {
            let mut decoder = EventStreamDecoder::new(1024);
            let mut messages = decoder.push(&bytes[..split]).unwrap();
            messages.extend(decoder.push(&bytes[split..]).unwrap());

            assert_eq!(messages.len(), 2, "split at {split}");
            assert_eq!(messages[0].event_type(), Some("messageStart"));
            assert_eq!(messages[0].message_type(), Some("event"));
            assert_eq!(&messages[1].payload[..], br#"{"delta":{"text":"Hi"}}"#);
            assert_eq!(decoder.pending_len(), 0);
        }
    }

    #[test]
    fn test_non_string_headers_are_skipped() {
        let mut headers = vec![4u8];
        headers.extend_from_slice(b"flag");
        headers.push(0);
        headers.push(5);
        headers.extend_from_slice(b"count");
        headers.push(4);
        headers.extend_from_slice(&7u32.to_be_bytes());

        let parsed = parse_headers(&headers).unwrap();
        assert!(parsed.is_empty());
    }

    fn prelude(total: u32, headers: u32) -> Vec<u8> {
        let mut bytes = total.to_be_bytes().to_vec();
        bytes.extend_from_slice(&headers.to_be_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let mut decoder = EventStreamDecoder::new(1024);
        let frame = prelude(8, 0);
        assert_eq!(decoder.push(&frame), Err(EventStreamError::FrameTooShort(8)));

        let mut decoder = EventStreamDecoder::new(32);
        let frame = event("metadata", "{}");
        assert!(matches!(
            decoder.push(&frame),
            Err(EventStreamError::FrameTooLarge { .. })
        ));

        let mut decoder = EventStreamDecoder::new(1024);
        let mut frame = prelude(20, 200);
        frame.extend_from_slice(&[0; 8]);
        assert!(matches!(
            decoder.push(&frame),
            Err(EventStreamError::HeadersOverrun { .. })
        ));
    }

    #[test]
    fn test_rejects_corrupted_checksums() {
        let frame = event("contentBlockDelta", r#"{"delta":{"text":"Hi"}}"#);

        let mut payload_flipped = frame.clone();
        let at = payload_flipped.len() - 6;
        payload_flipped[at] ^= 0x01;
        let mut decoder = EventStreamDecoder::new(1024);
        assert!(matches!(
            decoder.push(&payload_flipped),
            Err(EventStreamError::ChecksumMismatch { section: "message", .. })
        ));

        let mut length_flipped = frame;
        length_flipped[3] ^= 0x01;
        let mut decoder = EventStreamDecoder::new(1024);
        assert!(matches!(
            decoder.push(&length_flipped[..PRELUDE_LEN]),
            Err(EventStreamError::ChecksumMismatch { section: "prelude", .. })
        ));
    }
}
