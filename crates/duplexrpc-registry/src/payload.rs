use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire name of the `Error` response sentinel.
pub const ERROR_TYPE: &str = "duplexrpc.v1.Error";
/// Wire name of the `Close` (stream completion) response sentinel.
pub const CLOSE_TYPE: &str = "duplexrpc.v1.Close";
/// Wire name of the `Undefined` (handler returned nothing) response sentinel.
pub const UNDEFINED_TYPE: &str = "duplexrpc.v1.Undefined";
/// Wire name of the built-in free-form JSON message (`serde_json::Value`).
pub const JSON_TYPE: &str = "duplexrpc.v1.Json";

/// A boxed argument as it appears inside a call envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedPayload {
    #[serde(rename = "typeName")]
    pub type_name: String,
    pub bytes: Vec<u8>,
}

impl TypedPayload {
    pub fn new(type_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            bytes,
        }
    }

    /// True for the `Error`, `Close` and `Undefined` sentinels.
    pub fn is_reserved(&self) -> bool {
        is_reserved_name(&self.type_name)
    }
}

pub(crate) fn is_reserved_name(name: &str) -> bool {
    matches!(name, ERROR_TYPE | CLOSE_TYPE | UNDEFINED_TYPE)
}

/// Body of the `Error` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An application message whose concrete type is known only at runtime.
pub struct AnyMessage {
    value: Box<dyn Any + Send + Sync>,
    rust_type: &'static str,
}

impl AnyMessage {
    /// Box a concrete message value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            rust_type: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the boxed value, for diagnostics.
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Unbox the concrete value, handing the message back on a type mismatch.
    pub fn downcast<T: 'static>(self) -> std::result::Result<T, Self> {
        let rust_type = self.rust_type;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self { value, rust_type }),
        }
    }

    pub(crate) fn value(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("rust_type", &self.rust_type)
            .finish_non_exhaustive()
    }
}

/// A decoded call argument: an application message or one of the sentinels.
#[derive(Debug)]
pub enum Payload {
    /// A registered application message.
    Message(AnyMessage),
    /// The remote handler failed.
    Error(ErrorPayload),
    /// A streaming response completed normally.
    Close,
    /// The remote handler returned no value.
    Undefined,
}

impl Payload {
    /// Wrap a concrete application message.
    pub fn message<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Message(AnyMessage::new(value))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload::new(message))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Message(_) => "message",
            Payload::Error(_) => "error",
            Payload::Close => "close",
            Payload::Undefined => "undefined",
        }
    }
}
