/// Errors that can occur while sending or receiving frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream on a frame boundary.
    ///
    /// This is the normal way a host ends a session, not a failure.
    #[error("end of stream")]
    EndOfStream,

    /// The stream closed part-way through a frame.
    #[error("truncated frame: expected {expected} bytes, stream ended after {received}")]
    Truncated { expected: usize, received: usize },

    /// A read timed out before a complete frame arrived.
    ///
    /// Any bytes already read stay buffered; retrying resumes the same frame.
    #[error("timed out waiting for frame")]
    Timeout,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the caller may simply retry the same operation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Timeout)
    }

    /// Whether this marks a clean close by the peer.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameError::EndOfStream)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
