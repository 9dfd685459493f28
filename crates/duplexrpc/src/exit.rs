use std::fmt;
use std::io;

use duplexrpc_frame::FrameError;
use duplexrpc_host::{CallError, HostError};
use duplexrpc_transport::TransportError;

// Exit codes follow the sysexits/coreutils conventions used across 3leaps CLIs.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::EmptyPayload => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn host_error(context: &str, err: HostError) -> CliError {
    let code = match err {
        HostError::Frame(err) => return frame_error(context, err),
        HostError::Registry(_) | HostError::Envelope(_) => DATA_INVALID,
        HostError::ReservedMethod(_) => USAGE,
        HostError::Closed => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn call_error(context: &str, err: CallError) -> CliError {
    let code = match err {
        CallError::Host(err) => return host_error(context, err),
        CallError::Remote(_) | CallError::Disconnected => FAILURE,
        CallError::Timeout(_) => TIMEOUT,
        CallError::Decode(_) | CallError::UnexpectedType { .. } => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}
