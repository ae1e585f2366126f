//! The blocking worker loop.
//!
//! A [`Worker`] owns one framed stream to its host and runs the cycle
//!
//! ```text
//! Idle -> AwaitingRequest -> Processing -> SendingReply -> Idle
//! ```
//!
//! until the host closes the stream, the shutdown flag is set or a fatal
//! error occurs. A listener thread started by [`Worker::initial`] watches the
//! side channel for the shutdown sentinel.

use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use taskpipe_frame::{FrameConfig, FrameError, FramedChannel};
use taskpipe_transport::IpcStream;
use tracing::{debug, error, info, trace, warn};

use crate::codec::TaskCodec;
use crate::control::{spawn_listener, ControlSource, ListenerExit, DEFAULT_SENTINEL};
use crate::error::{Result, WorkerError};
use crate::shutdown::ShutdownFlag;
use crate::task::{InputTask, OutputTask, Status};

/// Default interval at which a waiting worker re-checks its shutdown flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Payload codec for requests and replies.
    pub codec: TaskCodec,
    /// Side-channel token that requests shutdown.
    pub sentinel: String,
    /// Upper bound on how long the loop and the listener wait before
    /// re-checking the shutdown flag.
    pub poll_interval: Duration,
    pub frame: FrameConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            codec: TaskCodec::default(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            frame: FrameConfig::default(),
        }
    }
}

/// Where the worker currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    AwaitingRequest,
    Processing,
    SendingReply,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::AwaitingRequest => "awaiting_request",
            WorkerState::Processing => "processing",
            WorkerState::SendingReply => "sending_reply",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why a worker loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The shutdown flag was set.
    Shutdown,
    /// The host closed the stream between frames.
    PeerClosed,
}

/// Per-task view handed to a [`Processor`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    deadline: Option<Instant>,
    flag: ShutdownFlag,
}

impl TaskContext {
    /// Context for a task allowed to run for `timeout`, measured from now.
    pub fn new(timeout: Option<Duration>, flag: ShutdownFlag) -> Self {
        Self {
            deadline: timeout.and_then(|t| Instant::now().checked_add(t)),
            flag,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.is_set()
    }

    /// Whether the task should stop early: its deadline passed or the
    /// worker is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.is_shutting_down() || self.remaining() == Some(Duration::ZERO)
    }
}

/// Turns one request into one reply.
///
/// Any `FnMut(InputTask) -> OutputTask` is a processor. Wrap a closure that
/// also wants the [`TaskContext`] with [`with_context`].
pub trait Processor {
    fn process(&mut self, task: InputTask, ctx: &TaskContext) -> OutputTask;
}

impl<F> Processor for F
where
    F: FnMut(InputTask) -> OutputTask,
{
    fn process(&mut self, task: InputTask, _ctx: &TaskContext) -> OutputTask {
        self(task)
    }
}

/// Processor adapter for closures taking the task context.
pub struct WithContext<F>(F);

pub fn with_context<F>(f: F) -> WithContext<F>
where
    F: FnMut(InputTask, &TaskContext) -> OutputTask,
{
    WithContext(f)
}

impl<F> Processor for WithContext<F>
where
    F: FnMut(InputTask, &TaskContext) -> OutputTask,
{
    fn process(&mut self, task: InputTask, ctx: &TaskContext) -> OutputTask {
        (self.0)(task, ctx)
    }
}

/// A worker bound to one host stream.
pub struct Worker<R, W> {
    channel: FramedChannel<R, W>,
    config: WorkerConfig,
    flag: ShutdownFlag,
    state: WorkerState,
    listener: Option<JoinHandle<ListenerExit>>,
}

impl<R: Read, W: Write> Worker<R, W> {
    /// Worker over separate read and write halves.
    ///
    /// Read timeouts cannot be applied to arbitrary readers; without one the
    /// flag is only re-checked when a frame arrives or the stream closes.
    pub fn new(reader: R, writer: W, config: WorkerConfig) -> Self {
        let channel = FramedChannel::with_config(reader, writer, config.frame.clone());
        Self::from_channel(channel, config)
    }

    pub fn from_channel(channel: FramedChannel<R, W>, config: WorkerConfig) -> Self {
        Self {
            channel,
            config,
            flag: ShutdownFlag::new(),
            state: WorkerState::Idle,
            listener: None,
        }
    }

    /// Handle to this worker's shutdown flag.
    ///
    /// Setting it stops the loop at the next cycle boundary.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start the shutdown listener on `source` and return immediately.
    pub fn initial<S>(&mut self, source: S) -> Result<()>
    where
        S: ControlSource + 'static,
    {
        if self.state == WorkerState::Terminated {
            return Err(WorkerError::Terminated);
        }
        if self.listener.is_some() {
            return Err(WorkerError::AlreadyInitialized);
        }

        let handle = spawn_listener(
            source,
            self.config.sentinel.clone(),
            self.config.poll_interval,
            self.flag.clone(),
        )
        .map_err(WorkerError::ListenerSpawn)?;
        self.listener = Some(handle);
        debug!(sentinel = %self.config.sentinel, "shutdown listener started");
        Ok(())
    }

    /// Run request/reply cycles until the worker terminates.
    ///
    /// On every exit path the shutdown flag is set and the listener is
    /// joined before this returns.
    pub fn do_work<P: Processor>(&mut self, mut processor: P) -> Result<Termination> {
        if self.state == WorkerState::Terminated {
            return Err(WorkerError::Terminated);
        }
        let Some(listener) = self.listener.take() else {
            return Err(WorkerError::NotInitialized);
        };

        info!("worker loop started");
        let outcome = self.run(&mut processor);

        self.flag.trigger();
        let joined = listener.join();
        self.set_state(WorkerState::Terminated);

        match joined {
            Ok(exit) => debug!(?exit, "shutdown listener joined"),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(error = %message, "shutdown listener panicked");
                if outcome.is_ok() {
                    return Err(WorkerError::ListenerPanicked(message));
                }
            }
        }

        match &outcome {
            Ok(termination) => info!(?termination, "worker loop finished"),
            Err(err) => error!(error = %err, "worker loop failed"),
        }
        outcome
    }

    fn run<P: Processor>(&mut self, processor: &mut P) -> Result<Termination> {
        loop {
            if self.flag.is_set() {
                self.set_state(WorkerState::ShuttingDown);
                info!("shutdown requested");
                return Ok(Termination::Shutdown);
            }

            self.set_state(WorkerState::AwaitingRequest);
            let payload = match self.next_request()? {
                Next::Request(payload) => payload,
                Next::Stop(termination) => {
                    if termination == Termination::Shutdown {
                        self.set_state(WorkerState::ShuttingDown);
                        info!("shutdown requested");
                    } else {
                        info!("host closed the stream");
                    }
                    return Ok(termination);
                }
            };

            let task = match self.config.codec.decode_input(&payload) {
                Ok(task) => task,
                Err(err) => return Err(self.fail(WorkerError::Decode(err))),
            };

            self.set_state(WorkerState::Processing);
            let correlation_id = task.correlation_id.clone();
            debug!(
                correlation_id = correlation_id.as_deref().unwrap_or(""),
                size = payload.len(),
                "task received"
            );
            let ctx = TaskContext::new(task.timeout(), self.flag.clone());
            let reply = invoke(processor, task, &ctx);

            self.set_state(WorkerState::SendingReply);
            let bytes = match self.config.codec.encode_output(&reply) {
                Ok(bytes) => bytes,
                Err(err) => return Err(self.fail(WorkerError::Encode(err))),
            };
            if let Err(err) = self.channel.send_frame(&bytes) {
                return Err(self.fail(WorkerError::Send(err)));
            }
            debug!(
                correlation_id = correlation_id.as_deref().unwrap_or(""),
                status = reply.status.code(),
                size = bytes.len(),
                "reply sent"
            );

            self.set_state(WorkerState::Idle);
        }
    }

    /// Wait for the next request frame, re-checking the flag on every read
    /// timeout. A partially received request is always completed.
    fn next_request(&mut self) -> Result<Next> {
        loop {
            match self.channel.receive_frame() {
                Ok(payload) => return Ok(Next::Request(payload)),
                Err(FrameError::Timeout) => {
                    let buffered = self.channel.reader().buffered_len();
                    if buffered > 0 {
                        trace!(buffered, "partial frame pending");
                    } else if self.flag.is_set() {
                        return Ok(Next::Stop(Termination::Shutdown));
                    }
                }
                Err(FrameError::EndOfStream) => return Ok(Next::Stop(Termination::PeerClosed)),
                Err(err) => return Err(self.fail(WorkerError::Receive(err))),
            }
        }
    }

    fn set_state(&mut self, next: WorkerState) {
        trace!(from = %self.state, to = %next, "worker state");
        self.state = next;
    }

    fn fail(&self, err: WorkerError) -> WorkerError {
        error!(state = %self.state, error = %err, "worker cycle failed");
        err
    }

    /// Recover the underlying reader and writer.
    pub fn into_inner(self) -> (R, W) {
        let (reader, writer) = self.channel.into_parts();
        (reader.into_inner(), writer.into_inner())
    }
}

impl Worker<IpcStream, IpcStream> {
    /// Worker over a connected stream.
    ///
    /// The frame read timeout is capped at the poll interval so a waiting
    /// worker notices the shutdown flag. Poll intervals below one millisecond
    /// are raised to one millisecond.
    pub fn from_stream(stream: IpcStream, mut config: WorkerConfig) -> Result<Self> {
        // Sockets reject a zero read timeout.
        let poll = config.poll_interval.max(MIN_POLL_INTERVAL);
        config.poll_interval = poll;
        config.frame.read_timeout = Some(match config.frame.read_timeout {
            Some(t) if t < poll => t.max(MIN_POLL_INTERVAL),
            _ => poll,
        });
        let channel = FramedChannel::from_stream(stream, config.frame.clone())?;
        Ok(Self::from_channel(channel, config))
    }

    /// Connect to the host's socket at `path`.
    #[cfg(unix)]
    pub fn connect(path: impl AsRef<std::path::Path>, config: WorkerConfig) -> Result<Self> {
        let stream = taskpipe_transport::UnixDomainSocket::connect(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "connected to host");
        Self::from_stream(stream, config)
    }
}

enum Next {
    Request(Bytes),
    Stop(Termination),
}

/// Run the processor with panics turned into an `UNKNOWN_ERROR` reply.
pub(crate) fn invoke<P: Processor + ?Sized>(
    processor: &mut P,
    task: InputTask,
    ctx: &TaskContext,
) -> OutputTask {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(task, ctx))) {
        Ok(reply) => reply,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(error = %message, "processor panicked");
            OutputTask::new(message, Status::UNKNOWN_ERROR)
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "processor panicked".to_string()
    }
}
