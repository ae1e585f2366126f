use std::fmt;
use std::io;

use taskpipe_frame::FrameError;
use taskpipe_transport::TransportError;
use taskpipe_worker::WorkerError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A command failure carrying the process exit code.
#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidPipeName { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::PathTooLong { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::Truncated { .. } | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::EndOfStream => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn worker_error(context: &str, err: WorkerError) -> CliError {
    match err {
        WorkerError::Transport(err) => transport_error(context, err),
        WorkerError::Receive(err) | WorkerError::Send(err) | WorkerError::Frame(err) => {
            frame_error(context, err)
        }
        WorkerError::Decode(_) | WorkerError::Encode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        WorkerError::Disconnected => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
