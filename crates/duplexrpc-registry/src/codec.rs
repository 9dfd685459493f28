use std::any::Any;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::payload::AnyMessage;

/// Error type returned by codec implementations.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Encodes and decodes one concrete message type.
pub trait Codec<T>: Send + Sync + 'static {
    /// Serialize `value` to its wire bytes.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Parse wire bytes back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec for any `serde` message type.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Type-erased view of a `Codec<T>` stored in the registry.
pub(crate) trait ErasedCodec: Send + Sync {
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<AnyMessage, CodecError>;
}

pub(crate) struct TypedCodec<T, C> {
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> TypedCodec<T, C> {
    pub(crate) fn new(codec: C) -> Self {
        Self {
            codec,
            _marker: PhantomData,
        }
    }
}

impl<T, C> ErasedCodec for TypedCodec<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T>,
{
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or("value does not match the registered type")?;
        self.codec.encode(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<AnyMessage, CodecError> {
        self.codec.decode(bytes).map(AnyMessage::new)
    }
}
