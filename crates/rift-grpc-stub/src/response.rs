//! Response descriptions produced by matchers.

use crate::message::Message;
use crate::metadata::Metadata;
use serde_json::Value;
use tonic::{Code, Status};

/// What to send back for one matched request.
///
/// Unary and client-streaming calls send only `messages[0]` (or the empty
/// output message when there is none). A failing `status` suppresses every
/// message.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub headers: Metadata,
    pub trailers: Metadata,
    pub messages: Vec<Message>,
    pub status: Option<Status>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn trailer(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.trailers.append(key, value);
        self
    }

    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.message(Message::from(value))
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// The configured status when it represents a failure.
    pub fn failure(&self) -> Option<&Status> {
        self.status.as_ref().filter(|s| s.code() != Code::Ok)
    }
}
