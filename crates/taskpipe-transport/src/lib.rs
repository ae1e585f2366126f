//! Local stream transport for taskpipe.
//!
//! A worker talks to its host over exactly one pre-established duplex byte
//! stream. This crate owns that stream type ([`IpcStream`]) and the small
//! amount of plumbing needed to obtain one:
//! - resolving the pipe name a host hands to its worker ([`pipe_path`])
//! - connecting to (worker side) or binding and accepting on (host side) a
//!   Unix domain socket ([`UnixDomainSocket`])
//!
//! Everything above this layer only sees `Read + Write`.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::{pipe_path, UnixDomainSocket, DEFAULT_PIPE_PREFIX};
