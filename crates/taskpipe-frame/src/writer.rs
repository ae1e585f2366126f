use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use taskpipe_transport::IpcStream;
use tracing::{debug, trace};

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload are encoded into one buffer and written together, so
/// the bytes of two frames never interleave.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one payload, then flush (blocking).
    ///
    /// Returns only once the whole frame has been handed to the transport.
    /// A write timeout surfaces as [`FrameError::Io`] with kind `WouldBlock`
    /// or `TimedOut`; part of the frame may already be on the wire, so the
    /// stream is no longer usable for framing.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.effective_max_payload();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::Io(std::io::Error::from(ErrorKind::WriteZero))),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(
                        written = offset,
                        total = self.buf.len(),
                        error = %err,
                        "frame write failed"
                    );
                    return Err(FrameError::Io(err));
                }
            }
        }

        self.flush()?;
        trace!(size = payload.len(), "frame sent");
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
