//! Length-prefixed framing for the taskpipe worker protocol.
//!
//! Every message travels as one frame:
//! - a 4-byte big-endian unsigned payload length
//! - exactly that many payload bytes
//!
//! Readers perform exact-length reads no matter how the transport chunks
//! the bytes; callers only ever see complete frames.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use channel::FramedChannel;
pub use codec::{
    decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_WIRE_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::LengthPrefixCodec;
