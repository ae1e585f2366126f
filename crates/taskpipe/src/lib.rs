//! Framed request/reply worker protocol over local sockets.
//!
//! A host hands a long-lived worker process one task at a time over a
//! single duplex stream; the worker answers each with one result and stops
//! when the host closes the stream or sends the shutdown sentinel on the
//! worker's stdin.
//!
//! # Crate Structure
//!
//! - [`transport`]: the stream type and Unix socket bind/connect helpers
//! - [`frame`]: 4-byte big-endian length-prefixed framing
//! - [`worker`]: task records, payload codec, worker loop and dispatcher
//!
//! The most used types are re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use taskpipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use taskpipe_frame::*;
}

/// Re-export worker types.
pub mod worker {
    pub use taskpipe_worker::*;
}

pub use taskpipe_worker::{
    with_context, Dispatcher, InputTask, OutputTask, Processor, ShutdownFlag, Status, TaskCodec,
    TaskContext, Termination, Worker, WorkerConfig, WorkerError,
};

#[cfg(feature = "async")]
pub use taskpipe_worker::AsyncWorker;
