use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use taskpipe_transport::IpcStream;
use tracing::trace;

use crate::codec::{decode_frame, expected_frame_len, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Reads are exact-length: the reader never asks the transport for more
/// bytes than the current frame still needs, so nothing past the frame
/// boundary is consumed. Partial reads are retried internally and bytes
/// received before a timeout are kept for the next call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    ///
    /// The read timeout is not applied to `inner`; see
    /// [`FrameReader::with_config_ipc`] for streams that support it.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Returns [`FrameError::EndOfStream`] when the stream closes on a frame
    /// boundary, [`FrameError::Truncated`] when it closes mid-frame, and
    /// [`FrameError::Timeout`] when the transport's read timeout fires.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        let max_payload = self.config.effective_max_payload();
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, max_payload)? {
                trace!(size = payload.len(), "frame received");
                return Ok(payload);
            }

            let needed = expected_frame_len(&self.buf) - self.buf.len();
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let want = needed.min(READ_CHUNK_SIZE);
            let read = match self.inner.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Err(FrameError::Timeout);
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(self.closed_error());
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Number of bytes of the next frame already received.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn closed_error(&self) -> FrameError {
        if self.buf.is_empty() {
            return FrameError::EndOfStream;
        }
        let expected = expected_frame_len(&self.buf);
        debug_assert!(expected >= HEADER_SIZE);
        FrameError::Truncated {
            expected,
            received: self.buf.len(),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: taskpipe_transport::TransportError) -> FrameError {
    match err {
        taskpipe_transport::TransportError::Io(io)
        | taskpipe_transport::TransportError::Accept(io) => FrameError::Io(io),
        taskpipe_transport::TransportError::Bind { source, .. }
        | taskpipe_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"hello"])));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"one", b"two", b"three"])));

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"three");
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::EndOfStream
        ));
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = FrameReader::new(Cursor::new(wire(&[&payload])));
        assert_eq!(reader.read_frame().unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn zero_length_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"", b"after"])));
        assert!(reader.read_frame().unwrap().is_empty());
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"after");
    }

    #[test]
    fn byte_at_a_time_transport() {
        let payload = vec![0x5A; 300];
        let byte_reader = ByteByByteReader {
            bytes: wire(&[b"slow", &payload]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"slow");
        assert_eq!(reader.read_frame().unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn never_reads_past_frame_boundary() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"first", b"second"])));
        reader.read_frame().unwrap();

        let consumed = reader.get_ref().position() as usize;
        assert_eq!(consumed, HEADER_SIZE + b"first".len());
    }

    #[test]
    fn clean_close_is_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn close_mid_header_is_truncated() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00, 0x00]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 4,
                received: 2
            }
        ));
    }

    #[test]
    fn close_mid_payload_is_truncated() {
        let mut partial = BytesMut::new();
        partial.put_u32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 20,
                received: 13
            }
        ));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u32(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn timeout_keeps_partial_header() {
        let bytes = wire(&[b"resume"]);
        let reader = StallingReader {
            bytes,
            pos: 0,
            stall_at: vec![2, 7],
        };
        let mut framed = FrameReader::new(reader);

        let err = framed.read_frame().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(framed.buffered_len(), 2);

        let err = framed.read_frame().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(framed.buffered_len(), 7);

        assert_eq!(framed.read_frame().unwrap().as_ref(), b"resume");
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[b"ok"])),
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn other_io_errors_propagate() {
        let mut framed = FrameReader::new(FailingReader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(
            reader.config().max_payload_size,
            crate::codec::DEFAULT_MAX_PAYLOAD
        );
        let _inner = reader.into_inner();
    }

    #[test]
    #[cfg(unix)]
    fn ipc_stream_read_timeout_reports_timeout() {
        let (_host, worker) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_ipc(worker, cfg).unwrap();
        assert!(reader.read_frame().unwrap_err().is_timeout());
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Delivers one byte per read and times out once at each `stall_at`
    /// offset.
    struct StallingReader {
        bytes: Vec<u8>,
        pos: usize,
        stall_at: Vec<usize>,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(idx) = self.stall_at.iter().position(|&at| at == self.pos) {
                self.stall_at.remove(idx);
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::ConnectionReset))
        }
    }
}
