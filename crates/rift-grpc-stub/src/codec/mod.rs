//! Conversion between wire messages and the generic [`Message`] tree.
//!
//! ## Module Structure
//!
//! - `dynamic`: tonic codec framing `DynamicMessage` values for one method
//!
//! Decoding always populates default-valued fields so predicates can look
//! at zero values the same way as set ones. Encoding is lenient about
//! missing and unknown keys but strict about value types.

mod dynamic;

pub use dynamic::DynamicCodec;

use crate::error::{Result, StubError};
use crate::message::Message;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
};
use serde_json::Value;

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false)
}

fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unknown_fields(false)
}

/// Convert a decoded wire message into its generic form.
pub fn decode(message: &DynamicMessage) -> Result<Message> {
    let value = message
        .serialize_with_options(serde_json::value::Serializer, &serialize_options())
        .map_err(|e| StubError::ProtocolViolation {
            message: message.descriptor().full_name().to_string(),
            reason: e.to_string(),
        })?;
    Ok(Message::from(value))
}

/// Decode raw protobuf bytes of type `descriptor` into the generic form.
pub fn decode_bytes(bytes: &[u8], descriptor: &MessageDescriptor) -> Result<Message> {
    let message = DynamicMessage::decode(descriptor.clone(), bytes).map_err(|e| {
        StubError::ProtocolViolation {
            message: descriptor.full_name().to_string(),
            reason: e.to_string(),
        }
    })?;
    decode(&message)
}

/// Build a wire message of type `descriptor` from a generic message.
///
/// Absent keys keep the field's zero value and unknown keys are ignored.
/// A value that cannot be coerced into its field type is a
/// [`StubError::SchemaMismatch`].
pub fn encode(message: &Message, descriptor: &MessageDescriptor) -> Result<DynamicMessage> {
    let value = Value::Object(message.as_map().clone());
    DynamicMessage::deserialize_with_options(descriptor.clone(), value, &deserialize_options())
        .map_err(|e| StubError::SchemaMismatch {
            message: descriptor.full_name().to_string(),
            reason: e.to_string(),
        })
}

/// Convert a generic message into a generated protobuf type.
pub fn transcode_to<T>(message: &Message, descriptor: &MessageDescriptor) -> Result<T>
where
    T: prost::Message + Default,
{
    let dynamic = encode(message, descriptor)?;
    dynamic
        .transcode_to::<T>()
        .map_err(|e| StubError::SchemaMismatch {
            message: descriptor.full_name().to_string(),
            reason: e.to_string(),
        })
}

/// Convert a generated protobuf value into the generic form of `descriptor`.
pub fn transcode_from<T>(value: &T, descriptor: &MessageDescriptor) -> Result<Message>
where
    T: prost::Message,
{
    let mut dynamic = DynamicMessage::new(descriptor.clone());
    dynamic
        .transcode_from(value)
        .map_err(|e| StubError::SchemaMismatch {
            message: descriptor.full_name().to_string(),
            reason: e.to_string(),
        })?;
    decode(&dynamic)
}
