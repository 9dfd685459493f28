//! Bidirectional, multiplexed RPC over any duplex byte stream.
//!
//! Two processes (or two tasks) each run a [`Host`] on one end of a stream.
//! Either side can call methods the other registered, with unary, async and
//! streaming replies multiplexed over the same connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex byte streams (in-memory pipes, stdio, Unix sockets)
//! - [`frame`]: 4-byte little-endian length-prefixed framing
//! - [`registry`]: type registry boxing call arguments as named payloads
//! - [`host`]: call envelopes, pending-call table, dispatcher, client facade

/// Re-export transport types.
pub mod transport {
    pub use duplexrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use duplexrpc_frame::*;
}

/// Re-export registry types.
pub mod registry {
    pub use duplexrpc_registry::*;
}

/// Re-export host types.
pub mod host {
    pub use duplexrpc_host::*;
}

pub use duplexrpc_host::{
    CallError, CallStream, Client, HandlerError, Host, HostConfig, HostError, MethodTable,
    PendingCall, Response,
};
pub use duplexrpc_registry::{AnyMessage, JsonCodec, Payload, TypeRegistry};
pub use duplexrpc_transport::Transport;
