//! Length-prefixed message framing for duplexrpc.
//!
//! Every serialized call envelope travels in one frame:
//! - A 4-byte little-endian payload length
//! - Exactly that many payload bytes
//!
//! Zero-length frames are never written and are rejected when read.
//! Transports may split or coalesce frames arbitrarily; the decoders here
//! accumulate bytes until a whole frame is available.

pub mod codec;
pub mod error;
pub mod reader;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;

#[cfg(feature = "async")]
pub use async_codec::RpcCodec;
