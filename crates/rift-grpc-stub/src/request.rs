//! Inbound call records.

use crate::codec;
use crate::error::Result;
use crate::message::Message;
use crate::metadata::Metadata;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::fmt;

/// One decoded inbound message together with its call metadata.
///
/// Client-streaming and bidirectional calls produce one `Request` per
/// inbound message, all sharing the call's headers.
#[derive(Debug, Clone)]
pub struct Request {
    /// Fully-qualified service name, e.g. `routeguide.RouteGuide`.
    pub service: String,
    /// Bare method name, e.g. `GetFeature`.
    pub method: String,
    pub headers: Metadata,
    pub message: Message,
    input: Option<MessageDescriptor>,
}

impl Request {
    pub fn new(service: impl Into<String>, method: impl Into<String>, message: Message) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            headers: Metadata::new(),
            message,
            input: None,
        }
    }

    pub fn with_headers(mut self, headers: Metadata) -> Self {
        self.headers = headers;
        self
    }

    /// Build the record for a message received on `method`.
    pub(crate) fn decoded(
        method: &MethodDescriptor,
        headers: Metadata,
        message: &DynamicMessage,
    ) -> Result<Self> {
        Ok(Self {
            service: method.parent_service().full_name().to_string(),
            method: method.name().to_string(),
            headers,
            message: codec::decode(message)?,
            input: Some(method.input()),
        })
    }

    /// `/service/method`, the HTTP/2 path of the call.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Descriptor of the inbound message type, when the record came off the
    /// wire.
    pub fn input_descriptor(&self) -> Option<&MessageDescriptor> {
        self.input.as_ref()
    }

    /// Convert the message into a generated protobuf type.
    ///
    /// Returns `None` for records built by hand, which carry no schema.
    pub fn message_as<T>(&self) -> Option<Result<T>>
    where
        T: prost::Message + Default,
    {
        self.input
            .as_ref()
            .map(|input| codec::transcode_to(&self.message, input))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path())?;
        for (key, values) in self.headers.iter() {
            writeln!(f, "{}: {}", key, values.join(", "))?;
        }
        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", self.message)?;
        }
        Ok(())
    }
}
