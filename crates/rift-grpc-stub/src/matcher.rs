//! Request matchers.
//!
//! A [`Matcher`] is a cheap, clonable handle: the server keeps one copy in
//! its ordered list and the caller keeps another to configure it and read
//! its request log. Configuration methods consume and return the handle so
//! calls chain:
//!
//! ```ignore
//! server
//!     .method("GetFeature")
//!     .header("session", "XXX")
//!     .response(json!({"name": "hello"}));
//! ```

use crate::codec;
use crate::error::{Result, StubError};
use crate::generator::{Generator, Generators};
use crate::journal::CallLog;
use crate::message::Message;
use crate::request::Request;
use crate::response::Response;
use parking_lot::RwLock;
use prost_reflect::MethodDescriptor;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tonic::Status;

pub type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
pub type HandlerFn = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// One configured contribution to the response, applied in order to an
/// empty [`Response`].
#[derive(Clone)]
enum ResponseStep {
    Header(String, String),
    Trailer(String, String),
    Message(Message),
    Encoded(Vec<u8>),
    Unparsable(String),
    Dynamic(Generators),
    Status(Status),
    Handler(HandlerFn),
}

#[derive(Default)]
struct MatcherInner {
    predicates: RwLock<Vec<Predicate>>,
    steps: RwLock<Vec<ResponseStep>>,
    requests: CallLog,
}

#[derive(Clone, Default)]
pub struct Matcher {
    inner: Arc<MatcherInner>,
}

impl Matcher {
    /// A matcher that accepts every request until predicates are added.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Predicates
    // ========================================================================

    /// Add a predicate. All predicates must accept for the matcher to match.
    pub fn matches<F>(self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.inner.predicates.write().push(Arc::new(predicate));
        self
    }

    /// Require the fully-qualified service name (a leading `/` is ignored).
    pub fn service(self, service: impl Into<String>) -> Self {
        let service = service.into();
        let expected = service.trim_start_matches('/').to_string();
        self.matches(move |r: &Request| r.service == expected)
    }

    /// Require a method: a bare name (`GetFeature`) compares the method
    /// only, a path (`/routeguide.RouteGuide/GetFeature`) compares both
    /// service and method.
    pub fn method(self, method: impl Into<String>) -> Self {
        let method = method.into();
        match method.trim_start_matches('/').rsplit_once('/') {
            Some((service, name)) => {
                let (service, name) = (service.to_string(), name.to_string());
                self.matches(move |r: &Request| r.service == service && r.method == name)
            }
            None => self.matches(move |r: &Request| r.method == method),
        }
    }

    /// True when every predicate accepts every request.
    pub fn accepts(&self, requests: &[Arc<Request>]) -> bool {
        let predicates = self.inner.predicates.read();
        requests
            .iter()
            .all(|request| predicates.iter().all(|predicate| predicate(request)))
    }

    // ========================================================================
    // Response configuration
    // ========================================================================

    pub fn header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(ResponseStep::Header(key.into(), value.into()))
    }

    pub fn trailer(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(ResponseStep::Trailer(key.into(), value.into()))
    }

    /// Add a response message in its JSON form. Non-object values add an
    /// empty message.
    pub fn response(self, message: impl Into<Message>) -> Self {
        self.push(ResponseStep::Message(message.into()))
    }

    /// Add a response message from JSON text. Text that is not a JSON
    /// object fails every call it answers with an internal error.
    pub fn response_string(self, text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => self.push(ResponseStep::Message(Message::from(map))),
            Ok(other) => self.push(ResponseStep::Unparsable(format!(
                "expected a JSON object, got {other}"
            ))),
            Err(e) => self.push(ResponseStep::Unparsable(e.to_string())),
        }
    }

    /// Add a response message from a generated protobuf value.
    pub fn response_proto<T: prost::Message>(self, message: &T) -> Self {
        self.push(ResponseStep::Encoded(message.encode_to_vec()))
    }

    /// Add synthetic response messages for the method's output type.
    pub fn response_dynamic(self, generators: impl IntoIterator<Item = Generator>) -> Self {
        self.push(ResponseStep::Dynamic(generators.into_iter().collect()))
    }

    /// Set the terminal status. A failing status suppresses all messages.
    pub fn status(self, status: Status) -> Self {
        self.push(ResponseStep::Status(status))
    }

    /// Replace the whole response with one computed from the request.
    /// Steps configured earlier are discarded; later steps apply on top.
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        {
            let mut steps = self.inner.steps.write();
            steps.clear();
            steps.push(ResponseStep::Handler(Arc::new(handler)));
        }
        self
    }

    fn push(self, step: ResponseStep) -> Self {
        self.inner.steps.write().push(step);
        self
    }

    /// Evaluate the configured steps for `request` on `method`.
    pub fn respond(&self, request: &Request, method: &MethodDescriptor) -> Result<Response> {
        let steps = self.inner.steps.read().clone();
        let mut response = Response::new();
        for step in steps {
            match step {
                ResponseStep::Header(key, value) => response.headers.append(key, value),
                ResponseStep::Trailer(key, value) => response.trailers.append(key, value),
                ResponseStep::Message(message) => response.messages.push(message),
                ResponseStep::Encoded(bytes) => {
                    let output = method.output();
                    let message = codec::decode_bytes(&bytes, &output).map_err(|e| {
                        StubError::SchemaMismatch {
                            message: output.full_name().to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    response.messages.push(message);
                }
                ResponseStep::Unparsable(reason) => {
                    return Err(StubError::SchemaMismatch {
                        message: method.output().full_name().to_string(),
                        reason,
                    });
                }
                ResponseStep::Dynamic(generators) => {
                    response
                        .messages
                        .extend(generators.messages(request, method));
                }
                ResponseStep::Status(status) => response.status = Some(status),
                ResponseStep::Handler(handler) => response = handler(request),
            }
        }
        Ok(response)
    }

    // ========================================================================
    // Request log
    // ========================================================================

    /// Requests this matcher accepted, in arrival order.
    pub fn requests(&self) -> Vec<Arc<Request>> {
        self.inner.requests.snapshot()
    }

    pub(crate) fn record(&self, requests: &[Arc<Request>]) {
        self.inner.requests.extend(requests);
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("predicates", &self.inner.predicates.read().len())
            .field("steps", &self.inner.steps.read().len())
            .field("requests", &self.inner.requests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use serde_json::json;
    use tonic::Code;

    fn point(latitude: i64, longitude: i64) -> Arc<Request> {
        Arc::new(Request::new(
            "routeguide.RouteGuide",
            "GetFeature",
            Message::from(json!({"latitude": latitude, "longitude": longitude})),
        ))
    }

    #[test]
    fn test_empty_matcher_accepts_everything() {
        assert!(Matcher::new().accepts(&[point(1, 2)]));
    }

    #[test]
    fn test_service_predicate_trims_leading_slash() {
        let request = point(0, 0);
        assert!(Matcher::new()
            .service("/routeguide.RouteGuide")
            .accepts(&[request.clone()]));
        assert!(Matcher::new()
            .service("routeguide.RouteGuide")
            .accepts(&[request.clone()]));
        assert!(!Matcher::new().service("routeguide").accepts(&[request]));
    }

    #[test]
    fn test_method_predicate_forms() {
        let request = point(0, 0);
        for pattern in [
            "GetFeature",
            "routeguide.RouteGuide/GetFeature",
            "/routeguide.RouteGuide/GetFeature",
        ] {
            assert!(
                Matcher::new().method(pattern).accepts(&[request.clone()]),
                "{pattern}"
            );
        }
        for pattern in ["ListFeatures", "/other.Service/GetFeature", "RouteGuide/GetFeature"] {
            assert!(
                !Matcher::new().method(pattern).accepts(&[request.clone()]),
                "{pattern}"
            );
        }
    }

    #[test]
    fn test_predicates_are_anded_over_all_requests() {
        let matcher = Matcher::new()
            .method("GetFeature")
            .matches(|r| r.message.get("/latitude") == Some(&json!(10)));
        assert!(matcher.accepts(&[point(10, 1), point(10, 2)]));
        assert!(!matcher.accepts(&[point(10, 1), point(11, 2)]));
    }

    #[test]
    fn test_respond_applies_steps_in_order() {
        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let matcher = Matcher::new()
            .header("session", "XXX")
            .trailer("size", "213")
            .response(json!({"name": "hello"}))
            .response_string(r#"{"name": "world"}"#)
            .status(Status::aborted("aborted"));

        let response = matcher.respond(&point(0, 0), &method).unwrap();
        assert_eq!(response.headers.get("session"), Some("XXX"));
        assert_eq!(response.trailers.get("size"), Some("213"));
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[0]["name"], json!("hello"));
        assert_eq!(response.failure().unwrap().code(), Code::Aborted);
    }

    #[test]
    fn test_handler_replaces_earlier_steps() {
        let method = fixtures::method("routeguide.RouteGuide", "RouteChat");
        let matcher = Matcher::new()
            .response(json!({"message": "ignored"}))
            .handler(|r| {
                let text = r.message["message"].as_str().unwrap_or_default();
                Response::new().json(json!({"message": text.replace("client", "server")}))
            })
            .header("after", "yes");

        let request = Request::new(
            "routeguide.RouteGuide",
            "RouteChat",
            Message::from(json!({"message": "hello from client[3]"})),
        );
        let response = matcher.respond(&request, &method).unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0]["message"], json!("hello from server[3]"));
        assert_eq!(response.headers.get("after"), Some("yes"));
    }

    #[test]
    fn test_encoded_response_uses_output_schema() {
        #[derive(Clone, PartialEq, prost::Message)]
        struct Feature {
            #[prost(string, tag = "1")]
            name: String,
        }

        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let response = Matcher::new()
            .response_proto(&Feature {
                name: "hello".to_string(),
            })
            .respond(&point(0, 0), &method)
            .unwrap();
        assert_eq!(response.messages[0]["name"], json!("hello"));
    }

    #[test]
    fn test_unparsable_response_string_is_schema_mismatch() {
        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let err = Matcher::new()
            .response_string("{not json")
            .respond(&point(0, 0), &method)
            .unwrap_err();
        assert!(matches!(err, StubError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_dynamic_response_for_unary() {
        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let response = Matcher::new()
            .response_dynamic([Generator::new("name", |_| json!("generated"))])
            .respond(&point(0, 0), &method)
            .unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0]["name"], json!("generated"));
    }

    #[test]
    fn test_record_keeps_arrival_order() {
        let matcher = Matcher::new();
        matcher.record(&[point(1, 1), point(2, 2)]);
        let requests = matcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].message["latitude"], json!(2));
    }
}
