use crate::codec::CodecError;

/// Errors raised while registering codecs or boxing/unboxing payloads.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No codec is registered under the wire type name.
    #[error("unknown payload type: {0}")]
    UnknownType(String),

    /// The value's Rust type has no registered codec.
    #[error("no codec registered for {0}")]
    UnregisteredValue(&'static str),

    /// The wire name is already registered for a different Rust type.
    #[error("type name {name} is already registered for {existing}")]
    DuplicateTypeName { name: String, existing: &'static str },

    /// The Rust type is already registered under a different wire name.
    #[error("{rust_type} is already registered as {existing}")]
    ConflictingTypeName {
        rust_type: &'static str,
        existing: String,
    },

    /// The wire name is reserved for a response sentinel or is empty.
    #[error("type name {0:?} is reserved")]
    ReservedTypeName(String),

    /// The codec failed to encode a value.
    #[error("failed to encode {type_name}: {source}")]
    Encode {
        type_name: String,
        source: CodecError,
    },

    /// The codec failed to decode payload bytes.
    #[error("failed to decode {type_name}: {source}")]
    Decode {
        type_name: String,
        source: CodecError,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
