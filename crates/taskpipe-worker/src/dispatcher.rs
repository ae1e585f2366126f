use std::io::{Read, Write};

use taskpipe_frame::{FrameConfig, FrameError, FramedChannel};
use taskpipe_transport::IpcStream;
use tracing::debug;

use crate::codec::TaskCodec;
use crate::error::{Result, WorkerError};
use crate::task::{InputTask, OutputTask};

/// Host side of a worker stream: sends one task and waits for its reply.
pub struct Dispatcher<R, W> {
    channel: FramedChannel<R, W>,
    codec: TaskCodec,
}

impl<R: Read, W: Write> Dispatcher<R, W> {
    pub fn new(reader: R, writer: W, codec: TaskCodec) -> Self {
        Self::from_channel(FramedChannel::new(reader, writer), codec)
    }

    pub fn from_channel(channel: FramedChannel<R, W>, codec: TaskCodec) -> Self {
        Self { channel, codec }
    }

    /// Send `task` and block until the worker replies.
    pub fn dispatch(&mut self, task: &InputTask) -> Result<OutputTask> {
        self.send(task)?;
        self.receive()
    }

    pub fn send(&mut self, task: &InputTask) -> Result<()> {
        let bytes = self.codec.encode_input(task).map_err(WorkerError::Encode)?;
        self.channel.send_frame(&bytes).map_err(WorkerError::Send)?;
        debug!(
            correlation_id = task.correlation_id.as_deref().unwrap_or(""),
            size = bytes.len(),
            "task dispatched"
        );
        Ok(())
    }

    /// Wait for the next reply. A clean close is reported as
    /// [`WorkerError::Disconnected`].
    pub fn receive(&mut self) -> Result<OutputTask> {
        let payload = match self.channel.receive_frame() {
            Ok(payload) => payload,
            Err(FrameError::EndOfStream) => return Err(WorkerError::Disconnected),
            Err(err) => return Err(WorkerError::Receive(err)),
        };
        self.codec
            .decode_output(&payload)
            .map_err(WorkerError::Decode)
    }

    pub fn codec(&self) -> TaskCodec {
        self.codec
    }

    pub fn into_channel(self) -> FramedChannel<R, W> {
        self.channel
    }
}

impl Dispatcher<IpcStream, IpcStream> {
    pub fn from_stream(stream: IpcStream, codec: TaskCodec, frame: FrameConfig) -> Result<Self> {
        let channel = FramedChannel::from_stream(stream, frame)?;
        Ok(Self::from_channel(channel, codec))
    }
}
