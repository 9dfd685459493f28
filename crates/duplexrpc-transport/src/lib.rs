//! Duplex byte-stream transports.
//!
//! The RPC host only needs an ordered, reliable, byte-oriented duplex stream.
//! This crate packages the streams duplexrpc ships with behind one type:
//! - in-memory pipe pairs (tests, same-process peers)
//! - standard input/output (a child process talking to its parent)
//! - Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of duplexrpc. Everything else builds on top of
//! the [`Transport`] type provided here.

pub mod error;
pub mod memory;
pub mod stdio;
pub mod transport;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{memory_pair, DEFAULT_PIPE_CAPACITY};
pub use stdio::stdio;
pub use transport::{BoxedReader, BoxedWriter, Transport};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
