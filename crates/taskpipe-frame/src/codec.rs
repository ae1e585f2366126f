use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: big-endian payload length (4 bytes).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest payload the 4-byte length header can describe.
pub const MAX_WIRE_PAYLOAD: usize = u32::MAX as usize;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┐
/// │ Length (4B BE)   │ Payload          │
/// │ unsigned         │ (Length bytes)   │
/// └──────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_WIRE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_WIRE_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet;
/// the buffer is left untouched in that case. On success, consumes the
/// frame bytes and returns the payload.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let Some(payload_len) = peek_length(src) else {
        return Ok(None);
    };

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        src.reserve(HEADER_SIZE + payload_len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Wire size of the frame currently at the front of `src`, as far as it is
/// known: just the header while the header is incomplete.
pub(crate) fn expected_frame_len(src: &[u8]) -> usize {
    match peek_length(src) {
        Some(len) => HEADER_SIZE.saturating_add(len),
        None => HEADER_SIZE,
    }
}

fn peek_length(src: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Configuration for framed reads and writes.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB, capped at
    /// [`MAX_WIRE_PAYLOAD`].
    pub max_payload_size: usize,
    /// Read timeout for blocking receives. `None` blocks indefinitely.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking sends.
    pub write_timeout: Option<std::time::Duration>,
}

impl FrameConfig {
    pub(crate) fn effective_max_payload(&self) -> usize {
        self.max_payload_size.min(MAX_WIRE_PAYLOAD)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, taskpipe!";

        encode_frame(payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_is_big_endian_length() {
        let mut buf = BytesMut::new();
        encode_frame(&[7u8; 258], &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x01][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 3, "partial header must stay buffered");
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(32 * 1024 * 1024);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf).unwrap();
        encode_frame(b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(f1.as_ref(), b"first");
        assert_eq!(f2.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0, 0, 0, 0]);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert!(frame.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn expected_len_tracks_header_progress() {
        assert_eq!(expected_frame_len(&[0, 0]), HEADER_SIZE);
        assert_eq!(expected_frame_len(&[0, 0, 0, 9, 1]), HEADER_SIZE + 9);
    }

    #[test]
    fn effective_max_is_capped_by_header_width() {
        let cfg = FrameConfig {
            max_payload_size: usize::MAX,
            ..FrameConfig::default()
        };
        assert_eq!(cfg.effective_max_payload(), MAX_WIRE_PAYLOAD);
    }
}
