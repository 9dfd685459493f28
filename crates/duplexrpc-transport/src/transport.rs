use std::fmt;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// Owned, type-erased read half of a transport.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Owned, type-erased write half of a transport.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A connected duplex byte stream, split into independent halves.
///
/// The host drives the read half from its dispatch loop and the write half
/// from its writer task, so the halves are owned separately from the start.
pub struct Transport {
    reader: BoxedReader,
    writer: BoxedWriter,
    kind: &'static str,
}

impl Transport {
    /// Build a transport from separate read and write halves.
    pub fn from_halves<R, W>(reader: R, writer: W, kind: &'static str) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            kind,
        }
    }

    /// Build a transport from a single bidirectional stream.
    pub fn from_stream<S>(stream: S, kind: &'static str) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(reader, writer, kind)
    }

    /// Transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Consume the transport and return its halves.
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind).finish()
    }
}
