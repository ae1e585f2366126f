//! `tokio_util::codec` adapter for the frame format.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, expected_frame_len, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Frames an async stream with the same wire format and close semantics as
/// [`FrameReader`](crate::FrameReader)/[`FrameWriter`](crate::FrameWriter).
#[derive(Debug, Clone)]
pub struct LengthPrefixCodec {
    max_payload_size: usize,
}

impl LengthPrefixCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: max_payload_size.min(crate::codec::MAX_WIRE_PAYLOAD),
        }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let expected = expected_frame_len(src);
        let received = src.len();
        src.clear();
        Err(FrameError::Truncated { expected, received })
    }
}

impl Encoder<&[u8]> for LengthPrefixCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(item, dst)
    }
}

impl Encoder<Bytes> for LengthPrefixCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, item.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (host, worker) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(host, LengthPrefixCodec::default());
        let mut stream = FramedRead::new(worker, LengthPrefixCodec::default());

        let writer = tokio::spawn(async move {
            sink.send(Bytes::from_static(b"ping")).await.unwrap();
            sink.send(Bytes::new()).await.unwrap();
            sink.send(Bytes::from(vec![9u8; 1000])).await.unwrap();
        });

        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"ping");
        assert!(stream.next().await.unwrap().unwrap().is_empty());
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 1000);
        writer.await.unwrap();
        assert!(stream.next().await.is_none(), "clean close ends the stream");
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncated() {
        let (mut host, worker) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut host, &[0, 0, 0, 8, b'a'])
            .await
            .unwrap();
        drop(host);

        let mut stream = FramedRead::new(worker, LengthPrefixCodec::default());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 12,
                received: 5
            }
        ));
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = LengthPrefixCodec::new(2);
        let mut dst = BytesMut::new();
        let err = Encoder::<&[u8]>::encode(&mut codec, b"abc", &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
