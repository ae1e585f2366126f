//! Shutdown side channel.
//!
//! A host asks its worker to stop by writing a sentinel line on a channel
//! separate from the task stream (stdin for a spawned worker). The
//! [`ControlSource`] trait abstracts that channel so the listener can run
//! against stdin, any pollable file descriptor, an in-process channel or an
//! in-memory reader.

use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::shutdown::ShutdownFlag;

/// Default shutdown sentinel.
pub const DEFAULT_SENTINEL: &str = "__quit__";

/// Outcome of one [`ControlSource::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPoll {
    /// One complete token (a line without its terminator).
    Token(String),
    /// Nothing arrived within the timeout.
    Idle,
    /// The source is exhausted; no further tokens will arrive.
    Closed,
}

/// A source of control tokens.
pub trait ControlSource: Send {
    /// Wait up to `timeout` for the next token.
    ///
    /// Sources that cannot wait with a bound may block longer; the worker
    /// only returns once its listener has observed the flag, so such a source
    /// must yield promptly.
    fn poll(&mut self, timeout: Duration) -> io::Result<ControlPoll>;
}

/// Tokens read line by line from any `BufRead`.
///
/// Reads block without a bound, which suits in-memory readers and files.
/// Use [`FdLineSource`] for pipes and terminals.
pub struct LineSource<R> {
    reader: R,
}

impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> ControlSource for LineSource<R> {
    fn poll(&mut self, _timeout: Duration) -> io::Result<ControlPoll> {
        let mut line = String::new();
        match self.reader.read_line(&mut line)? {
            0 => Ok(ControlPoll::Closed),
            _ => Ok(ControlPoll::Token(strip_line_ending(line))),
        }
    }
}

/// Tokens delivered over an in-process channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// A connected sender and source.
    pub fn channel() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }
}

impl ControlSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> io::Result<ControlPoll> {
        match self.rx.recv_timeout(timeout) {
            Ok(token) => Ok(ControlPoll::Token(token)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(ControlPoll::Idle),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(ControlPoll::Closed),
        }
    }
}

#[cfg(unix)]
pub use fd::FdLineSource;

#[cfg(unix)]
mod fd {
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};
    use std::time::Duration;

    use super::{strip_line_ending, ControlPoll, ControlSource};

    const READ_CHUNK: usize = 512;

    /// Line tokens read from a pollable file descriptor (stdin, a pipe, a
    /// socket) with a bounded wait.
    ///
    /// Bytes are read straight from the descriptor into a private buffer, so
    /// no data is hidden in a userspace buffer the poll cannot see. The same
    /// source can first hand out a blocking handshake line
    /// ([`read_line`](Self::read_line)) and then serve as the shutdown
    /// listener's source.
    pub struct FdLineSource<F> {
        fd: F,
        buf: Vec<u8>,
        eof: bool,
    }

    impl FdLineSource<io::Stdin> {
        /// Source over the process's standard input.
        pub fn stdin() -> Self {
            Self::new(io::stdin())
        }
    }

    impl<F: AsRawFd + Send> FdLineSource<F> {
        pub fn new(fd: F) -> Self {
            Self {
                fd,
                buf: Vec::new(),
                eof: false,
            }
        }

        /// Block until one full line arrives. `None` at end of input.
        pub fn read_line(&mut self) -> io::Result<Option<String>> {
            loop {
                match self.next_token(None)? {
                    ControlPoll::Token(line) => return Ok(Some(line)),
                    ControlPoll::Closed => return Ok(None),
                    ControlPoll::Idle => continue,
                }
            }
        }

        fn next_token(&mut self, timeout: Option<Duration>) -> io::Result<ControlPoll> {
            if let Some(line) = self.take_line() {
                return Ok(ControlPoll::Token(line));
            }
            if self.eof {
                return Ok(self.take_rest());
            }
            if !wait_readable(self.fd.as_raw_fd(), timeout)? {
                return Ok(ControlPoll::Idle);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = read_fd(self.fd.as_raw_fd(), &mut chunk)?;
            if n == 0 {
                self.eof = true;
                return Ok(self.take_rest());
            }
            self.buf.extend_from_slice(&chunk[..n]);

            Ok(self
                .take_line()
                .map(ControlPoll::Token)
                .unwrap_or(ControlPoll::Idle))
        }

        fn take_line(&mut self) -> Option<String> {
            let end = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            Some(strip_line_ending(
                String::from_utf8_lossy(&line).into_owned(),
            ))
        }

        /// An unterminated final line still counts as a token.
        fn take_rest(&mut self) -> ControlPoll {
            if self.buf.is_empty() {
                return ControlPoll::Closed;
            }
            let rest = std::mem::take(&mut self.buf);
            ControlPoll::Token(strip_line_ending(
                String::from_utf8_lossy(&rest).into_owned(),
            ))
        }
    }

    impl<F: AsRawFd + Send> ControlSource for FdLineSource<F> {
        fn poll(&mut self, timeout: Duration) -> io::Result<ControlPoll> {
            self.next_token(Some(timeout))
        }
    }

    /// `Ok(false)` on timeout or signal interruption.
    fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid pollfd for the duration of the call and
        // the count passed is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0)
    }

    fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

fn strip_line_ending(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

/// Why a shutdown listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The sentinel arrived and this listener set the flag.
    Sentinel,
    /// Someone else set the flag.
    FlagSet,
    /// The source closed before any sentinel.
    SourceClosed,
    /// The source failed.
    SourceFailed,
}

/// Poll `source` until the sentinel arrives, the flag is set elsewhere or
/// the source closes.
///
/// Tokens are compared to `sentinel` after trimming surrounding whitespace;
/// anything else is ignored.
pub fn listen<S: ControlSource + ?Sized>(
    source: &mut S,
    sentinel: &str,
    poll_interval: Duration,
    flag: &ShutdownFlag,
) -> ListenerExit {
    let sentinel = sentinel.trim();
    loop {
        if flag.is_set() {
            return ListenerExit::FlagSet;
        }
        match source.poll(poll_interval) {
            Ok(ControlPoll::Token(token)) if token.trim() == sentinel => {
                if flag.trigger() {
                    info!("shutdown sentinel received");
                    return ListenerExit::Sentinel;
                }
                return ListenerExit::FlagSet;
            }
            Ok(ControlPoll::Token(token)) => {
                debug!(token = %token, "ignoring control token");
            }
            Ok(ControlPoll::Idle) => {}
            Ok(ControlPoll::Closed) => {
                debug!("control source closed");
                return ListenerExit::SourceClosed;
            }
            Err(err) => {
                warn!(error = %err, "control source failed");
                return ListenerExit::SourceFailed;
            }
        }
    }
}

/// Run [`listen`] on a dedicated thread.
pub(crate) fn spawn_listener<S>(
    mut source: S,
    sentinel: String,
    poll_interval: Duration,
    flag: ShutdownFlag,
) -> io::Result<JoinHandle<ListenerExit>>
where
    S: ControlSource + 'static,
{
    thread::Builder::new()
        .name("taskpipe-shutdown".to_string())
        .spawn(move || listen(&mut source, &sentinel, poll_interval, &flag))
}
