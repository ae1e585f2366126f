//! The duplex framed channel a worker and its host talk over.

use std::io::{Read, Write};

use bytes::Bytes;
use taskpipe_transport::IpcStream;

use crate::codec::FrameConfig;
use crate::error::Result;
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Owns both directions of one byte stream and moves whole frames over it.
///
/// Both operations take `&mut self`: a second send or receive cannot start
/// before the previous one returned, which is the single-flight discipline
/// the protocol relies on.
pub struct FramedChannel<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: Read, W: Write> FramedChannel<R, W> {
    /// Build a channel from separate read and write halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, FrameConfig::default())
    }

    /// Build a channel with explicit configuration.
    pub fn with_config(reader: R, writer: W, config: FrameConfig) -> Self {
        Self {
            reader: FrameReader::with_config(reader, config.clone()),
            writer: FrameWriter::with_config(writer, config),
        }
    }

    /// Build a channel from an existing reader/writer pair.
    pub fn from_parts(reader: FrameReader<R>, writer: FrameWriter<W>) -> Self {
        Self { reader, writer }
    }

    /// Send one frame and flush it.
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.send(payload)
    }

    /// Receive the next complete frame payload.
    pub fn receive_frame(&mut self) -> Result<Bytes> {
        self.reader.read_frame()
    }

    /// Borrow the read half.
    pub fn reader(&self) -> &FrameReader<R> {
        &self.reader
    }

    /// Borrow the write half.
    pub fn writer(&self) -> &FrameWriter<W> {
        &self.writer
    }

    /// Split back into the framed halves.
    pub fn into_parts(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

impl FramedChannel<IpcStream, IpcStream> {
    /// Frame a connected `IpcStream`, applying the configured timeouts.
    ///
    /// The stream is cloned so each direction owns its own handle.
    pub fn from_stream(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        let reader_stream = stream
            .try_clone()
            .map_err(crate::reader::transport_to_frame_error)?;
        let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;
        Ok(Self { reader, writer })
    }
}
