use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Prefix the .NET runtime gives named pipes on Unix; hosts built on it
/// hand their workers only the bare pipe name.
pub const DEFAULT_PIPE_PREFIX: &str = "/tmp/CoreFxPipe_";

/// Resolve the pipe name a host handed over into a socket path.
///
/// Surrounding whitespace (including the trailing newline of a line read
/// from stdin) is ignored. Names containing path separators or NUL bytes
/// are rejected.
pub fn pipe_path(prefix: &str, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TransportError::InvalidPipeName {
            name: name.to_string(),
            reason: "empty",
        });
    }
    if name.contains('/') || name.contains('\0') {
        return Err(TransportError::InvalidPipeName {
            name: name.to_string(),
            reason: "contains a path separator or NUL byte",
        });
    }
    Ok(PathBuf::from(format!("{prefix}{name}")))
}

/// Unix domain socket transport.
///
/// Workers only ever [`connect`](Self::connect). The host side
/// ([`bind`](Self::bind)/[`accept`](Self::accept)) exists for the
/// `dispatch` command, tests and in-process hosts. The socket file is
/// removed on drop when it is still the one this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the file already exists and is a socket, it is removed first
    /// (stale socket cleanup). Any other existing file is an error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::check_path_len(&path)?;

        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening for worker on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept the next worker connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted worker connection");
        Ok(stream.into())
    }

    /// Connect to the host's listening socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        Self::check_path_len(path)?;
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to host socket");
        Ok(stream.into())
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_path_len(path: &Path) -> Result<()> {
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(())
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}
