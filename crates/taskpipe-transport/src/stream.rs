use std::io::{Read, Write};
use std::net::Shutdown;
use std::time::Duration;

use crate::error::Result;

/// The connected worker/host byte stream.
///
/// On Unix this wraps a Unix domain socket stream. The stream is handed to
/// the framing layer and must not be read or written from anywhere else.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for IpcStream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }
}

impl IpcStream {
    /// Create a connected pair of streams (host end, worker end).
    ///
    /// Used by tests and by in-process embeddings that spawn the worker
    /// loop on a thread instead of a child process.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((left.into(), right.into()))
    }

    /// Set read timeout on the underlying stream.
    ///
    /// A timed-out read surfaces as `WouldBlock`/`TimedOut`, which the
    /// framing layer reports as a recoverable timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The framing layer keeps one handle per direction.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Ok(stream.try_clone()?.into()),
        }
    }

    /// Shut down one or both halves of the stream.
    ///
    /// Shutting down the write half is how a host signals a clean end of
    /// stream to its worker.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.shutdown(how).map_err(Into::into),
        }
    }

    /// Convert into a tokio stream for the async worker.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(all(unix, feature = "async"))]
    pub fn into_tokio(self) -> Result<tokio::net::UnixStream> {
        match self.inner {
            IpcStreamInner::Unix(stream) => {
                stream.set_nonblocking(true)?;
                Ok(tokio::net::UnixStream::from_std(stream)?)
            }
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{ErrorKind, Read, Write};

    use super::*;

    #[test]
    fn pair_is_connected_both_ways() {
        let (mut host, mut worker) = IpcStream::pair().unwrap();

        host.write_all(b"task").unwrap();
        let mut buf = [0u8; 4];
        worker.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"task");

        worker.write_all(b"done").unwrap();
        host.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"done");
    }

    #[test]
    fn write_shutdown_reads_as_eof() {
        let (host, mut worker) = IpcStream::pair().unwrap();
        host.shutdown(Shutdown::Write).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(worker.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_timeout_surfaces_as_would_block() {
        let (_host, mut worker) = IpcStream::pair().unwrap();
        worker
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 1];
        let err = worker.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::WouldBlock | ErrorKind::TimedOut
        ));
    }

    #[test]
    fn cloned_handle_shares_the_connection() {
        let (mut host, worker) = IpcStream::pair().unwrap();
        let mut reader = worker.try_clone().unwrap();

        host.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }
}
