use bytes::Bytes;
use duplexrpc_registry::TypedPayload;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved method name carried by every response frame.
pub const CALLBACK_METHOD: &str = "callback";

/// The unit of wire exchange: one envelope per frame.
///
/// `parent_id == 0` marks a fresh call; anything else is a response to the
/// call with that id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u32,
    #[serde(rename = "parentId", default)]
    pub parent_id: u32,
    pub method: String,
    pub argument: TypedPayload,
}

impl Envelope {
    /// A fresh call to `method`.
    pub fn call(id: u32, method: impl Into<String>, argument: TypedPayload) -> Self {
        Self {
            id,
            parent_id: 0,
            method: method.into(),
            argument,
        }
    }

    /// A response frame answering call `parent_id`.
    pub fn callback(id: u32, parent_id: u32, argument: TypedPayload) -> Self {
        Self {
            id,
            parent_id,
            method: CALLBACK_METHOD.to_string(),
            argument,
        }
    }

    /// True when this envelope answers an earlier call.
    pub fn is_callback(&self) -> bool {
        self.parent_id != 0
    }

    /// Serialize for framing.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a frame payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
