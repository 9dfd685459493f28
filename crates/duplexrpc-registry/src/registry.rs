use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, ErasedCodec, JsonCodec, TypedCodec};
use crate::error::{RegistryError, Result};
use crate::payload::{
    is_reserved_name, AnyMessage, ErrorPayload, Payload, TypedPayload, CLOSE_TYPE, ERROR_TYPE,
    JSON_TYPE, UNDEFINED_TYPE,
};

struct Entry {
    type_id: TypeId,
    rust_type: &'static str,
    codec: Arc<dyn ErasedCodec>,
}

/// Name-keyed registry of message codecs.
///
/// Encoding looks a value up by its Rust type; decoding looks a payload up by
/// the exact wire name. Build one per process (or per test), then share it
/// read-only between hosts behind an `Arc`.
#[derive(Default)]
pub struct TypeRegistry {
    by_name: HashMap<String, Entry>,
    by_type: HashMap<TypeId, String>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that already knows [`JSON_TYPE`] (`serde_json::Value`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert::<serde_json::Value, _>(JSON_TYPE.to_string(), JsonCodec::new());
        registry
    }

    /// Register a codec for `T` under `name`.
    ///
    /// Re-registering the same type under the same name replaces the codec.
    /// A name owned by another type, a second name for the same type, and the
    /// sentinel names are rejected.
    pub fn register<T, C>(&mut self, name: impl Into<String>, codec: C) -> Result<()>
    where
        T: Send + Sync + 'static,
        C: Codec<T>,
    {
        let name = name.into();
        if name.is_empty() || is_reserved_name(&name) {
            return Err(RegistryError::ReservedTypeName(name));
        }

        let type_id = TypeId::of::<T>();
        let rust_type = std::any::type_name::<T>();

        if let Some(existing) = self.by_name.get(&name) {
            if existing.type_id != type_id {
                return Err(RegistryError::DuplicateTypeName {
                    name,
                    existing: existing.rust_type,
                });
            }
        }
        if let Some(existing) = self.by_type.get(&type_id) {
            if *existing != name {
                return Err(RegistryError::ConflictingTypeName {
                    rust_type,
                    existing: existing.clone(),
                });
            }
        }

        self.insert(name, codec);
        Ok(())
    }

    fn insert<T, C>(&mut self, name: String, codec: C)
    where
        T: Send + Sync + 'static,
        C: Codec<T>,
    {
        let type_id = TypeId::of::<T>();
        let rust_type = std::any::type_name::<T>();
        tracing::debug!(type_name = %name, rust_type, "registered payload codec");
        self.by_type.insert(type_id, name.clone());
        self.by_name.insert(
            name,
            Entry {
                type_id,
                rust_type,
                codec: Arc::new(TypedCodec::<T, C>::new(codec)),
            },
        );
    }

    /// Register `T` with the JSON codec.
    pub fn register_json<T>(&mut self, name: impl Into<String>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.register::<T, _>(name, JsonCodec::<T>::new())
    }

    /// Wire name registered for `T`, if any.
    pub fn name_of<T: 'static>(&self) -> Option<&str> {
        self.by_type.get(&TypeId::of::<T>()).map(String::as_str)
    }

    /// Check if a wire name has a registered codec.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered wire names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Box a payload for the wire.
    pub fn encode_any(&self, payload: &Payload) -> Result<TypedPayload> {
        match payload {
            Payload::Message(message) => self.encode_message(message),
            Payload::Error(error) => Ok(TypedPayload::new(
                ERROR_TYPE,
                encode_sentinel(ERROR_TYPE, error)?,
            )),
            Payload::Close => Ok(TypedPayload::new(CLOSE_TYPE, b"{}".to_vec())),
            Payload::Undefined => Ok(TypedPayload::new(UNDEFINED_TYPE, b"{}".to_vec())),
        }
    }

    /// Box an application message, resolving its codec by Rust type.
    pub fn encode_message(&self, message: &AnyMessage) -> Result<TypedPayload> {
        let value: &(dyn Any + Send + Sync) = message.value();
        let name = self
            .by_type
            .get(&value.type_id())
            .ok_or(RegistryError::UnregisteredValue(message.rust_type()))?;
        let entry = self
            .by_name
            .get(name)
            .ok_or(RegistryError::UnregisteredValue(message.rust_type()))?;

        let bytes = entry
            .codec
            .encode(value)
            .map_err(|source| RegistryError::Encode {
                type_name: name.clone(),
                source,
            })?;
        Ok(TypedPayload::new(name.clone(), bytes))
    }

    /// Unbox a payload received from the wire.
    pub fn decode_any(&self, typed: &TypedPayload) -> Result<Payload> {
        match typed.type_name.as_str() {
            ERROR_TYPE => {
                let error: ErrorPayload =
                    serde_json::from_slice(&typed.bytes).map_err(|err| RegistryError::Decode {
                        type_name: ERROR_TYPE.to_string(),
                        source: err.into(),
                    })?;
                Ok(Payload::Error(error))
            }
            CLOSE_TYPE => Ok(Payload::Close),
            UNDEFINED_TYPE => Ok(Payload::Undefined),
            name => {
                let entry = self
                    .by_name
                    .get(name)
                    .ok_or_else(|| RegistryError::UnknownType(name.to_string()))?;
                let message =
                    entry
                        .codec
                        .decode(&typed.bytes)
                        .map_err(|source| RegistryError::Decode {
                            type_name: name.to_string(),
                            source,
                        })?;
                Ok(Payload::Message(message))
            }
        }
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

fn encode_sentinel(type_name: &str, error: &ErrorPayload) -> Result<Vec<u8>> {
    serde_json::to_vec(error).map_err(|err| RegistryError::Encode {
        type_name: type_name.to_string(),
        source: err.into(),
    })
}
