//! Long-lived task worker over a framed host stream.
//!
//! A host process hands its worker one [`InputTask`] at a time over a
//! length-prefixed stream and waits for the matching [`OutputTask`]. This
//! crate provides:
//! - the task records and their payload [`TaskCodec`] (MessagePack or JSON)
//! - the blocking [`Worker`] loop and its shutdown side channel
//!   ([`ControlSource`], [`ShutdownFlag`])
//! - a host-side [`Dispatcher`] that drives a worker
//! - with the `async` feature, a tokio [`AsyncWorker`]
//!
//! ```no_run
//! use taskpipe_worker::{FdLineSource, OutputTask, Worker, WorkerConfig};
//!
//! # fn main() -> taskpipe_worker::Result<()> {
//! let mut worker = Worker::connect("/tmp/CoreFxPipe_jobs", WorkerConfig::default())?;
//! worker.initial(FdLineSource::stdin())?;
//! worker.do_work(|task: taskpipe_worker::InputTask| {
//!     OutputTask::done(format!("Processed: {}", task.message))
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod shutdown;
pub mod task;
pub mod worker;

#[cfg(feature = "async")]
pub mod async_worker;

pub use codec::{CodecError, KeyConvention, TaskCodec, WireFormat};
#[cfg(unix)]
pub use control::FdLineSource;
pub use control::{
    listen, ChannelSource, ControlPoll, ControlSource, LineSource, ListenerExit, DEFAULT_SENTINEL,
};
pub use dispatcher::Dispatcher;
pub use error::{Result, WorkerError};
pub use shutdown::ShutdownFlag;
pub use task::{Headers, InputTask, OutputTask, Status, TIMEOUT_HEADER};
pub use worker::{
    with_context, Processor, TaskContext, Termination, WithContext, Worker, WorkerConfig,
    WorkerState, DEFAULT_POLL_INTERVAL,
};

#[cfg(feature = "async")]
pub use async_worker::{listen_lines, AsyncWorker};
