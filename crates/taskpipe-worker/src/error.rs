use crate::codec::CodecError;
use crate::worker::WorkerState;

/// Errors that terminate a worker loop or a dispatcher exchange.
///
/// Each variant records which step of the cycle failed so a desynchronised
/// stream can be told apart from an ordinary shutdown in the logs.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Receiving a frame failed (truncated frame, oversized frame, I/O).
    #[error("receive failed: {0}")]
    Receive(#[source] taskpipe_frame::FrameError),

    /// A received payload could not be decoded into a task record.
    #[error("decode failed: {0}")]
    Decode(#[source] CodecError),

    /// A task record could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] CodecError),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    Send(#[source] taskpipe_frame::FrameError),

    /// Setting up the stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] taskpipe_transport::TransportError),

    /// The stream could not be framed.
    #[error("frame setup failed: {0}")]
    Frame(#[from] taskpipe_frame::FrameError),

    /// `do_work` was called before `initial`.
    #[error("worker not initialized: call initial() before do_work()")]
    NotInitialized,

    /// `initial` was called twice.
    #[error("worker already initialized")]
    AlreadyInitialized,

    /// The worker already terminated and cannot run again.
    #[error("worker already terminated")]
    Terminated,

    /// The shutdown listener thread could not be started.
    #[error("failed to start shutdown listener: {0}")]
    ListenerSpawn(#[source] std::io::Error),

    /// The shutdown listener panicked.
    #[error("shutdown listener panicked: {0}")]
    ListenerPanicked(String),

    /// The peer closed the stream while a reply was expected.
    #[error("peer closed the stream")]
    Disconnected,
}

impl WorkerError {
    /// The cycle state the error was raised in, when it came from a cycle.
    pub fn state(&self) -> Option<WorkerState> {
        match self {
            WorkerError::Receive(_) | WorkerError::Decode(_) => Some(WorkerState::AwaitingRequest),
            WorkerError::Encode(_) | WorkerError::Send(_) => Some(WorkerState::SendingReply),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
