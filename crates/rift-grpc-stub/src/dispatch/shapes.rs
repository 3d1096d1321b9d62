//! Per-shape call handlers run by `tonic::server::Grpc`.
//!
//! Unary and server-streaming methods both go through
//! `Grpc::server_streaming` so that response headers are flushed before a
//! failure status ends the call; a trailers-only response is reserved for
//! calls that match nothing.

use super::trailers::TrailerSlot;
use super::Dispatcher;
use crate::codec;
use crate::error::StubError;
use crate::message::Message;
use crate::metadata::Metadata;
use crate::request::Request;
use crate::response::Response;
use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::server::{ServerStreamingService, StreamingService};
use tonic::{Status, Streaming};

pub(crate) type ResponseStream = BoxStream<'static, Result<DynamicMessage, Status>>;
type ResponseFuture = BoxFuture<'static, Result<tonic::Response<ResponseStream>, Status>>;

/// Headers the transport adds to every call; they are not recorded.
const TRANSPORT_HEADERS: [&str; 3] = ["te", "content-type", "user-agent"];

fn recorded_headers(map: &MetadataMap) -> Metadata {
    let mut headers = Metadata::from_grpc(map);
    headers.retain(|key| !key.starts_with("grpc-") && !TRANSPORT_HEADERS.contains(&key));
    headers
}

/// State shared by every handler of one call.
#[derive(Clone)]
pub(crate) struct CallContext {
    method: MethodDescriptor,
    dispatcher: Arc<Dispatcher>,
    trailers: TrailerSlot,
}

impl CallContext {
    pub(crate) fn new(method: MethodDescriptor, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            method,
            dispatcher,
            trailers: TrailerSlot::default(),
        }
    }

    pub(crate) fn trailers(&self) -> TrailerSlot {
        self.trailers.clone()
    }

    fn record(&self, headers: &Metadata, message: &DynamicMessage) -> Result<Arc<Request>, Status> {
        Request::decoded(&self.method, headers.clone(), message)
            .map(Arc::new)
            .map_err(Status::from)
    }

    fn not_found(&self) -> Status {
        StubError::NoMatch {
            service: self.method.parent_service().full_name().to_string(),
            method: self.method.name().to_string(),
        }
        .into()
    }

    /// Match `records` as one unit and evaluate the winner's response with
    /// the last record.
    fn resolve(&self, records: &[Arc<Request>]) -> Result<Response, Status> {
        let Some(last) = records.last() else {
            return Err(self.not_found());
        };
        let Some(matcher) = self.dispatcher.find(records) else {
            self.dispatcher.reject(records);
            return Err(self.not_found());
        };
        self.dispatcher.accept(&matcher, records);
        matcher.respond(last, &self.method).map_err(Status::from)
    }

    fn encode(&self, message: &Message) -> Result<DynamicMessage, Status> {
        codec::encode(message, &self.method.output()).map_err(Status::from)
    }

    /// Turn a response into the headers and message stream of a call that
    /// sends at most one round of output.
    fn reply(
        &self,
        response: Response,
        server_streaming: bool,
    ) -> Result<tonic::Response<ResponseStream>, Status> {
        self.trailers.set(response.trailers.clone());

        let items: Vec<Result<DynamicMessage, Status>> = if let Some(status) = response.failure() {
            vec![Err(status.clone())]
        } else if server_streaming {
            response
                .messages
                .iter()
                .map(|message| self.encode(message).map(Ok))
                .collect::<Result<_, _>>()?
        } else {
            let message = match response.messages.first() {
                Some(message) => self.encode(message)?,
                None => DynamicMessage::new(self.method.output()),
            };
            vec![Ok(message)]
        };

        let mut reply = tonic::Response::new(stream::iter(items).boxed());
        *reply.metadata_mut() = response.headers.to_grpc();
        Ok(reply)
    }
}

/// Unary and server-streaming calls: one inbound message.
pub(crate) struct SingleRequestHandler {
    ctx: CallContext,
    server_streaming: bool,
}

impl SingleRequestHandler {
    pub(crate) fn unary(ctx: CallContext) -> Self {
        Self {
            ctx,
            server_streaming: false,
        }
    }

    pub(crate) fn server_streaming(ctx: CallContext) -> Self {
        Self {
            ctx,
            server_streaming: true,
        }
    }
}

impl ServerStreamingService<DynamicMessage> for SingleRequestHandler {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = ResponseFuture;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let ctx = self.ctx.clone();
        let server_streaming = self.server_streaming;
        Box::pin(async move {
            let headers = recorded_headers(request.metadata());
            let record = ctx.record(&headers, request.get_ref())?;
            let response = ctx.resolve(&[record])?;
            ctx.reply(response, server_streaming)
        })
    }
}

/// Client-streaming calls: collect until end of input, then match once.
pub(crate) struct ClientStreamingHandler(pub(crate) CallContext);

impl StreamingService<DynamicMessage> for ClientStreamingHandler {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = ResponseFuture;

    fn call(&mut self, request: tonic::Request<Streaming<DynamicMessage>>) -> Self::Future {
        let ctx = self.0.clone();
        Box::pin(async move {
            let headers = recorded_headers(request.metadata());
            let mut inbound = request.into_inner();
            let mut records = Vec::new();
            loop {
                let received = inbound
                    .message()
                    .await
                    .and_then(|message| message.map(|m| ctx.record(&headers, &m)).transpose());
                match received {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => break,
                    Err(status) => {
                        ctx.dispatcher.reject(&records);
                        return Err(status);
                    }
                }
            }
            let response = ctx.resolve(&records)?;
            ctx.reply(response, false)
        })
    }
}

/// Bidirectional calls: every inbound message is matched on its own.
pub(crate) struct BidiStreamingHandler(pub(crate) CallContext);

impl StreamingService<DynamicMessage> for BidiStreamingHandler {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = ResponseFuture;

    fn call(&mut self, request: tonic::Request<Streaming<DynamicMessage>>) -> Self::Future {
        let ctx = self.0.clone();
        Box::pin(async move {
            let headers = recorded_headers(request.metadata());
            let mut inbound = request.into_inner();

            let Some(first) = inbound.message().await? else {
                return Ok(tonic::Response::new(stream::empty().boxed()));
            };
            let record = ctx.record(&headers, &first)?;
            let first = ctx.resolve(&[record])?;
            // Only the first matched response contributes headers.
            let response_headers = first.headers.to_grpc();

            let output = stream! {
                let mut response = first;
                'call: loop {
                    ctx.trailers.merge(&response.trailers);
                    if let Some(status) = response.failure() {
                        yield Err(status.clone());
                        break 'call;
                    }
                    for message in &response.messages {
                        match ctx.encode(message) {
                            Ok(encoded) => yield Ok(encoded),
                            Err(status) => {
                                yield Err(status);
                                break 'call;
                            }
                        }
                    }

                    let next = match inbound.message().await {
                        Ok(Some(next)) => next,
                        Ok(None) => break 'call,
                        Err(status) => {
                            yield Err(status);
                            break 'call;
                        }
                    };
                    let resolved = ctx
                        .record(&headers, &next)
                        .and_then(|record| ctx.resolve(&[record]));
                    match resolved {
                        Ok(next) => response = next,
                        Err(status) => {
                            yield Err(status);
                            break 'call;
                        }
                    }
                }
            };

            let mut reply = tonic::Response::new(output.boxed());
            *reply.metadata_mut() = response_headers;
            Ok(reply)
        })
    }
}
