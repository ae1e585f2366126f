use std::path::PathBuf;

/// Errors that can occur while establishing or configuring a worker stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the host-side socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the host's socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept a worker connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the stream itself.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The pipe name handed over by the host is unusable.
    #[error("invalid pipe name {name:?}: {reason}")]
    InvalidPipeName { name: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, TransportError>;
