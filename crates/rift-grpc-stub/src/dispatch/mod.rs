//! Call dispatch.
//!
//! The [`Dispatcher`] owns the ordered matcher list and the server-wide
//! request logs. Every method in the schema gets a [`MethodHandler`] that
//! decodes calls with the method's descriptors and drives the state machine
//! of its [`RpcShape`].

mod shapes;
mod trailers;

use crate::codec::DynamicCodec;
use crate::journal::CallLog;
use crate::matcher::Matcher;
use crate::request::Request;
use bytes::Bytes;
use parking_lot::RwLock;
use prost_reflect::MethodDescriptor;
use shapes::{BidiStreamingHandler, CallContext, ClientStreamingHandler, SingleRequestHandler};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonic::body::BoxBody;
use tonic::server::Grpc;
use tracing::debug;

/// Streaming shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl RpcShape {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => Self::Unary,
            (false, true) => Self::ServerStreaming,
            (true, false) => Self::ClientStreaming,
            (true, true) => Self::BidiStreaming,
        }
    }
}

impl fmt::Display for RpcShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unary => "unary",
            Self::ServerStreaming => "server-streaming",
            Self::ClientStreaming => "client-streaming",
            Self::BidiStreaming => "bidi-streaming",
        };
        f.write_str(name)
    }
}

/// Matcher list plus the matched and unmatched logs of one server.
#[derive(Debug, Default)]
pub struct Dispatcher {
    matchers: RwLock<Vec<Matcher>>,
    prepend_next: AtomicBool,
    requests: CallLog,
    unmatched: CallLog,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher at the end of the list, or at the front when
    /// [`Dispatcher::prepend`] was called since the last registration.
    pub fn add_matcher(&self, matcher: Matcher) -> Matcher {
        let mut matchers = self.matchers.write();
        if self.prepend_next.swap(false, Ordering::SeqCst) {
            matchers.insert(0, matcher.clone());
        } else {
            matchers.push(matcher.clone());
        }
        matcher
    }

    /// Give the next registered matcher priority over all existing ones.
    pub fn prepend(&self) {
        self.prepend_next.store(true, Ordering::SeqCst);
    }

    /// First matcher, in list order, accepting every record.
    pub fn find(&self, records: &[Arc<Request>]) -> Option<Matcher> {
        let matchers = self.matchers.read().clone();
        matchers.into_iter().find(|matcher| matcher.accepts(records))
    }

    pub(crate) fn accept(&self, matcher: &Matcher, records: &[Arc<Request>]) {
        if let Some(first) = records.first() {
            debug!("Matched {} ({} message(s))", first.path(), records.len());
        }
        self.requests.extend(records);
        matcher.record(records);
    }

    pub(crate) fn reject(&self, records: &[Arc<Request>]) {
        if let Some(first) = records.first() {
            debug!("No matcher for {} ({} message(s))", first.path(), records.len());
        }
        self.unmatched.extend(records);
    }

    /// Requests accepted by any matcher, in arrival order.
    pub fn requests(&self) -> Vec<Arc<Request>> {
        self.requests.snapshot()
    }

    /// Requests no matcher accepted, in arrival order.
    pub fn unmatched_requests(&self) -> Vec<Arc<Request>> {
        self.unmatched.snapshot()
    }

    /// Build a handler for every method, keyed by `/{service}/{method}`.
    pub fn register(
        self: &Arc<Self>,
        methods: impl IntoIterator<Item = MethodDescriptor>,
    ) -> HashMap<String, Arc<MethodHandler>> {
        methods
            .into_iter()
            .map(|method| {
                let handler = MethodHandler::new(method, Arc::clone(self));
                debug!("Registered {} method {}", handler.shape(), handler.path());
                (handler.path(), Arc::new(handler))
            })
            .collect()
    }
}

/// Serves one RPC method.
#[derive(Debug)]
pub struct MethodHandler {
    shape: RpcShape,
    method: MethodDescriptor,
    dispatcher: Arc<Dispatcher>,
}

impl MethodHandler {
    pub fn new(method: MethodDescriptor, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            shape: RpcShape::of(&method),
            method,
            dispatcher,
        }
    }

    pub fn shape(&self) -> RpcShape {
        self.shape
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn path(&self) -> String {
        format!(
            "/{}/{}",
            self.method.parent_service().full_name(),
            self.method.name()
        )
    }

    /// Run one call to completion of its response headers; the body streams
    /// the rest.
    pub async fn serve<B>(&self, request: http::Request<B>) -> http::Response<BoxBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    {
        let ctx = CallContext::new(self.method.clone(), Arc::clone(&self.dispatcher));
        let slot = ctx.trailers();
        let mut grpc = Grpc::new(DynamicCodec::new(self.method.clone()));
        let response = match self.shape {
            RpcShape::Unary => {
                grpc.server_streaming(SingleRequestHandler::unary(ctx), request)
                    .await
            }
            RpcShape::ServerStreaming => {
                grpc.server_streaming(SingleRequestHandler::server_streaming(ctx), request)
                    .await
            }
            RpcShape::ClientStreaming => {
                grpc.streaming(ClientStreamingHandler(ctx), request).await
            }
            RpcShape::BidiStreaming => grpc.streaming(BidiStreamingHandler(ctx), request).await,
        };
        trailers::with_trailers(response, slot)
    }
}
