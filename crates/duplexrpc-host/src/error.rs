use std::time::Duration;

use duplexrpc_frame::FrameError;
use duplexrpc_registry::RegistryError;

/// Errors raised by the host itself.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload could not be boxed or unboxed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The call envelope could not be serialized or parsed.
    #[error("envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The method name is reserved or empty.
    #[error("method name {0:?} is reserved")]
    ReservedMethod(String),

    /// The connection is gone; no more calls can be sent.
    #[error("host is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Why an outgoing call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote handler failed, or the method does not exist.
    #[error("remote error: {0}")]
    Remote(String),

    /// No response arrived in time. The remote handler may still run.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed before the call completed.
    #[error("connection closed before the call completed")]
    Disconnected,

    /// The response payload could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(#[source] RegistryError),

    /// The response decoded to a different type than the caller asked for.
    #[error("unexpected response type: expected {expected}, got {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    /// The call could not be sent.
    #[error(transparent)]
    Host(#[from] HostError),
}

impl CallError {
    /// Message carried by a remote `Error` reply.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            CallError::Remote(message) => Some(message),
            _ => None,
        }
    }
}

/// Failure raised by a local method handler.
///
/// Sent to the caller as an `Error` payload carrying `message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
