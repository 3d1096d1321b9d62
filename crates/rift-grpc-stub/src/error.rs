//! Error type shared by the codec, dispatcher and server.

use tonic::Status;

pub type Result<T, E = StubError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// A configured or generated response does not fit the output schema.
    #[error("response does not fit {message}: {reason}")]
    SchemaMismatch { message: String, reason: String },

    /// An inbound message could not be decoded against the input schema.
    #[error("failed to decode {message}: {reason}")]
    ProtocolViolation { message: String, reason: String },

    #[error("no matcher accepted /{service}/{method}")]
    NoMatch { service: String, method: String },

    #[error("invalid descriptor set: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    #[error("failed to decode descriptor set: {0}")]
    DescriptorDecode(#[from] prost::DecodeError),

    #[error("reflection service error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StubError> for Status {
    fn from(err: StubError) -> Self {
        match err {
            StubError::NoMatch { .. } => Status::not_found(err.to_string()),
            other => Status::internal(other.to_string()),
        }
    }
}
