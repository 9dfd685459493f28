//! Name-keyed codec registry for polymorphic call arguments.
//!
//! Every call envelope carries its argument as a [`TypedPayload`]: a wire type
//! name plus opaque bytes. The [`TypeRegistry`] maps names to codecs so the
//! host can box outgoing values and unbox incoming ones without knowing the
//! application's message types.
//!
//! The three response-only sentinels (`Error`, `Close`, `Undefined`) are not
//! registry entries; they are variants of the closed [`Payload`] enum with
//! fixed wire names that applications cannot claim.

pub mod codec;
pub mod error;
pub mod payload;
pub mod registry;

pub use codec::{Codec, CodecError, JsonCodec};
pub use error::{RegistryError, Result};
pub use payload::{
    AnyMessage, ErrorPayload, Payload, TypedPayload, CLOSE_TYPE, ERROR_TYPE, JSON_TYPE,
    UNDEFINED_TYPE,
};
pub use registry::TypeRegistry;
