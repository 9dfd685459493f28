//! Bidirectional RPC over a single duplex byte stream.
//!
//! A [`Host`] owns one transport. Both sides run a host, so either side can
//! call methods the other side registered in its [`MethodTable`]. Calls are
//! multiplexed: each outgoing call gets an id, every response frame names
//! the id it answers, and replies may arrive in any order.
//!
//! ```text
//!   caller                                   peer
//!   Host::call ──► [len][envelope id=7] ──►  read loop ─► MethodTable["echo"]
//!   expect_one ◄── [len][callback parent=7] ◄── response adapter
//! ```
//!
//! Handlers answer with a [`Response`]: a value, a future, a stream, or
//! nothing. Streams end with a `Close` frame or an `Error` frame. The typed
//! [`Client`] facade wraps `call` + `expect_one`/`expect_many`.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod pending;
pub mod response;
pub mod service;

pub use client::{Client, TypedStream};
pub use config::{HostConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_TOMBSTONES};
pub use envelope::{Envelope, CALLBACK_METHOD};
pub use error::{CallError, HandlerError, HostError, Result};
pub use host::{CallStream, Host, HostBuilder, PendingCall};
pub use pending::HostStats;
pub use response::Response;
pub use service::{Handler, MethodTable};

pub use duplexrpc_registry::{AnyMessage, Payload, TypeRegistry};
pub use duplexrpc_transport::Transport;
