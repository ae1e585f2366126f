//! Tokio flavour of the worker loop.
//!
//! Same cycle, states and shutdown rules as [`Worker`](crate::Worker), over
//! any `AsyncRead + AsyncWrite` stream. The processing callback returns a
//! future, and the shutdown listener is a tokio task reading lines from an
//! `AsyncBufRead`.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{FutureExt, SinkExt, StreamExt};
use taskpipe_frame::LengthPrefixCodec;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::control::ListenerExit;
use crate::error::{Result, WorkerError};
use crate::shutdown::ShutdownFlag;
use crate::task::{InputTask, OutputTask, Status};
use crate::worker::{panic_message, Termination, WorkerConfig, WorkerState};

/// A worker driving one async host stream.
pub struct AsyncWorker<T> {
    framed: Framed<T, LengthPrefixCodec>,
    config: WorkerConfig,
    flag: ShutdownFlag,
    state: WorkerState,
    listener: Option<JoinHandle<ListenerExit>>,
}

impl<T> AsyncWorker<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, config: WorkerConfig) -> Self {
        let codec = LengthPrefixCodec::new(config.frame.max_payload_size);
        Self {
            framed: Framed::new(io, codec),
            config,
            flag: ShutdownFlag::new(),
            state: WorkerState::Idle,
            listener: None,
        }
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Spawn the shutdown listener on the current runtime.
    pub fn initial<L>(&mut self, control: L) -> Result<()>
    where
        L: AsyncBufRead + Unpin + Send + 'static,
    {
        if self.state == WorkerState::Terminated {
            return Err(WorkerError::Terminated);
        }
        if self.listener.is_some() {
            return Err(WorkerError::AlreadyInitialized);
        }

        let sentinel = self.config.sentinel.clone();
        let poll = self.config.poll_interval;
        let flag = self.flag.clone();
        self.listener = Some(tokio::spawn(async move {
            listen_lines(control, &sentinel, poll, &flag).await
        }));
        Ok(())
    }

    /// Run cycles until the host closes the stream, the flag is set or a
    /// fatal error occurs. The listener is awaited before this returns.
    pub async fn do_work<F, Fut>(&mut self, mut process: F) -> Result<Termination>
    where
        F: FnMut(InputTask) -> Fut,
        Fut: std::future::Future<Output = OutputTask>,
    {
        if self.state == WorkerState::Terminated {
            return Err(WorkerError::Terminated);
        }
        let Some(listener) = self.listener.take() else {
            return Err(WorkerError::NotInitialized);
        };

        info!("async worker loop started");
        let outcome = self.run(&mut process).await;

        self.flag.trigger();
        let joined = listener.await;
        self.state = WorkerState::Terminated;

        match joined {
            Ok(exit) => debug!(?exit, "shutdown listener joined"),
            Err(err) => {
                error!(error = %err, "shutdown listener failed");
                if outcome.is_ok() {
                    return Err(WorkerError::ListenerPanicked(err.to_string()));
                }
            }
        }
        outcome
    }

    async fn run<F, Fut>(&mut self, process: &mut F) -> Result<Termination>
    where
        F: FnMut(InputTask) -> Fut,
        Fut: std::future::Future<Output = OutputTask>,
    {
        loop {
            if self.flag.is_set() {
                self.set_state(WorkerState::ShuttingDown);
                info!("shutdown requested");
                return Ok(Termination::Shutdown);
            }

            self.set_state(WorkerState::AwaitingRequest);
            let next = tokio::time::timeout(self.config.poll_interval, self.framed.next()).await;
            let payload = match next {
                Err(_elapsed) => {
                    if !self.framed.read_buffer().is_empty() {
                        trace!(buffered = self.framed.read_buffer().len(), "partial frame pending");
                        // Finish the pending request before honouring the flag.
                        match self.framed.next().await {
                            Some(Ok(payload)) => payload,
                            None => return Ok(self.peer_closed()),
                            Some(Err(err)) => return Err(self.fail(WorkerError::Receive(err))),
                        }
                    } else {
                        continue;
                    }
                }
                Ok(None) => return Ok(self.peer_closed()),
                Ok(Some(Err(err))) => return Err(self.fail(WorkerError::Receive(err))),
                Ok(Some(Ok(payload))) => payload,
            };

            let task = match self.config.codec.decode_input(&payload) {
                Ok(task) => task,
                Err(err) => return Err(self.fail(WorkerError::Decode(err))),
            };

            self.set_state(WorkerState::Processing);
            let reply = invoke_async(process, task).await;

            self.set_state(WorkerState::SendingReply);
            let bytes = match self.config.codec.encode_output(&reply) {
                Ok(bytes) => bytes,
                Err(err) => return Err(self.fail(WorkerError::Encode(err))),
            };
            let size = bytes.len();
            if let Err(err) = self.framed.send(Bytes::from(bytes)).await {
                return Err(self.fail(WorkerError::Send(err)));
            }
            debug!(status = reply.status.code(), size, "reply sent");

            self.set_state(WorkerState::Idle);
        }
    }

    fn peer_closed(&mut self) -> Termination {
        info!("host closed the stream");
        Termination::PeerClosed
    }

    fn set_state(&mut self, next: WorkerState) {
        trace!(from = %self.state, to = %next, "worker state");
        self.state = next;
    }

    fn fail(&self, err: WorkerError) -> WorkerError {
        error!(state = %self.state, error = %err, "worker cycle failed");
        err
    }
}

async fn invoke_async<F, Fut>(process: &mut F, task: InputTask) -> OutputTask
where
    F: FnMut(InputTask) -> Fut,
    Fut: std::future::Future<Output = OutputTask>,
{
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| process(task))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(payload) => Err(payload),
    };
    outcome.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(error = %message, "processor panicked");
        OutputTask::new(message, Status::UNKNOWN_ERROR)
    })
}

/// Read lines from `control` until the sentinel arrives, the flag is set or
/// the input ends. Waits are bounded by `poll_interval`.
pub async fn listen_lines<L>(
    control: L,
    sentinel: &str,
    poll_interval: Duration,
    flag: &ShutdownFlag,
) -> ListenerExit
where
    L: AsyncBufRead + Unpin,
{
    let sentinel = sentinel.trim();
    let mut lines = control.lines();
    loop {
        if flag.is_set() {
            return ListenerExit::FlagSet;
        }
        match tokio::time::timeout(poll_interval, lines.next_line()).await {
            Err(_elapsed) => {}
            Ok(Ok(Some(line))) if line.trim() == sentinel => {
                if flag.trigger() {
                    info!("shutdown sentinel received");
                    return ListenerExit::Sentinel;
                }
                return ListenerExit::FlagSet;
            }
            Ok(Ok(Some(line))) => debug!(token = %line, "ignoring control token"),
            Ok(Ok(None)) => return ListenerExit::SourceClosed,
            Ok(Err(err)) => {
                warn!(error = %err, "control source failed");
                return ListenerExit::SourceFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;
    use crate::codec::TaskCodec;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn async_request_reply_then_peer_close() {
        let (host, worker_end) = tokio::io::duplex(1024);
        let (_ctl_tx, ctl_rx) = tokio::io::duplex(64);
        let mut worker = AsyncWorker::new(worker_end, fast_config());
        worker.initial(BufReader::new(ctl_rx)).unwrap();

        let host_task = tokio::spawn(async move {
            let codec = TaskCodec::default();
            let mut host = Framed::new(host, LengthPrefixCodec::default());
            let request = codec.encode_input(&InputTask::new("ping")).unwrap();
            host.send(Bytes::from(request)).await.unwrap();
            let reply = host.next().await.unwrap().unwrap();
            codec.decode_output(&reply).unwrap()
        });

        let termination = worker
            .do_work(|task: InputTask| async move {
                tokio::task::yield_now().await;
                OutputTask::done(format!("Processed: {}", task.message))
            })
            .await
            .unwrap();

        assert_eq!(termination, Termination::PeerClosed);
        assert_eq!(host_task.await.unwrap(), OutputTask::done("Processed: ping"));
    }

    #[tokio::test]
    async fn sentinel_line_stops_async_worker() {
        let (_host, worker_end) = tokio::io::duplex(1024);
        let (mut ctl_tx, ctl_rx) = tokio::io::duplex(64);
        let mut worker = AsyncWorker::new(worker_end, fast_config());
        worker.initial(BufReader::new(ctl_rx)).unwrap();

        let sent_at = Instant::now();
        ctl_tx.write_all(b"noise\n__quit__\n").await.unwrap();

        let termination = worker
            .do_work(|task: InputTask| async move { OutputTask::done(task.message) })
            .await
            .unwrap();

        assert_eq!(termination, Termination::Shutdown);
        assert!(sent_at.elapsed() < Duration::from_secs(1));
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn panicking_future_replies_unknown_error() {
        let (host, worker_end) = tokio::io::duplex(1024);
        let (_ctl_tx, ctl_rx) = tokio::io::duplex(64);
        let mut worker = AsyncWorker::new(worker_end, fast_config());
        worker.initial(BufReader::new(ctl_rx)).unwrap();

        let host_task = tokio::spawn(async move {
            let codec = TaskCodec::default();
            let mut host = Framed::new(host, LengthPrefixCodec::default());
            let request = codec.encode_input(&InputTask::new("boom")).unwrap();
            host.send(Bytes::from(request)).await.unwrap();
            let reply = host.next().await.unwrap().unwrap();
            codec.decode_output(&reply).unwrap()
        });

        worker
            .do_work(|task: InputTask| async move {
                if task.message == "boom" {
                    panic!("async failure");
                }
                OutputTask::done(task.message)
            })
            .await
            .unwrap();

        let reply = host_task.await.unwrap();
        assert_eq!(reply.status, Status::UNKNOWN_ERROR);
        assert_eq!(reply.message, "async failure");
    }

    #[tokio::test]
    async fn do_work_requires_initial() {
        let (_host, worker_end) = tokio::io::duplex(64);
        let mut worker = AsyncWorker::new(worker_end, fast_config());
        let err = worker
            .do_work(|task: InputTask| async move { OutputTask::done(task.message) })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotInitialized));
    }
}
