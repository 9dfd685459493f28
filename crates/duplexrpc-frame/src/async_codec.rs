use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// `tokio_util` codec for length-prefixed frames.
///
/// Wrap a transport half in `FramedRead`/`FramedWrite` with this codec to get
/// a stream of payloads and a sink of payloads. The framed reader keeps its
/// own growable buffer, so frames split across reads are reassembled and
/// several frames delivered by one read are yielded one by one.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    max_payload_size: usize,
}

impl RpcCodec {
    /// Create a codec with the default payload limit.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Create a codec honoring the payload limit from `config`.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }

    /// Maximum payload accepted in either direction.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => {
                tracing::debug!(buffered = buf.len(), "eof inside a frame");
                Err(FrameError::ConnectionClosed)
            }
        }
    }
}

impl Encoder<Bytes> for RpcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&item, dst)
    }
}
