//! Custom trailers for a call.
//!
//! `tonic::server::Grpc` writes `grpc-status` into the final trailer frame
//! but has no hook for user trailers. Handlers store theirs in a
//! [`TrailerSlot`]; [`with_trailers`] merges the slot into the trailer frame
//! or, for trailers-only responses, into the response headers.

use crate::metadata::Metadata;
use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tonic::body::BoxBody;
use tonic::Status;

const GRPC_STATUS: &str = "grpc-status";
const RESERVED_PREFIX: &str = "grpc-";

/// Trailer set shared between a call's handler and its response body.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrailerSlot(Arc<Mutex<Metadata>>);

impl TrailerSlot {
    pub(crate) fn set(&self, trailers: Metadata) {
        *self.0.lock() = trailers;
    }

    /// Per-key last-writer-wins merge.
    pub(crate) fn merge(&self, trailers: &Metadata) {
        self.0.lock().merge_replacing(trailers);
    }

    pub(crate) fn snapshot(&self) -> Metadata {
        self.0.lock().clone()
    }

    fn append_to(&self, headers: &mut HeaderMap) {
        let custom = self.0.lock().to_grpc().into_headers();
        for (name, value) in custom.iter() {
            if !name.as_str().starts_with(RESERVED_PREFIX) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
}

/// Response body that appends the slot's entries to the trailer frame.
pub(crate) struct TrailerBody {
    inner: BoxBody,
    slot: TrailerSlot,
}

impl Body for TrailerBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => match frame.into_trailers() {
                Ok(mut trailers) => {
                    this.slot.append_to(&mut trailers);
                    Poll::Ready(Some(Ok(Frame::trailers(trailers))))
                }
                Err(frame) => Poll::Ready(Some(Ok(frame))),
            },
            other => Poll::Ready(other),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Attach the slot's trailers to a response produced by `tonic::server::Grpc`.
pub(crate) fn with_trailers(
    response: http::Response<BoxBody>,
    slot: TrailerSlot,
) -> http::Response<BoxBody> {
    let (mut parts, body) = response.into_parts();
    if parts.headers.contains_key(GRPC_STATUS) {
        // Trailers-only: the handler has already finished.
        slot.append_to(&mut parts.headers);
        return http::Response::from_parts(parts, body);
    }
    let body = TrailerBody { inner: body, slot }.boxed_unsync();
    http::Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::{Full, StreamBody};

    fn slot(pairs: &[(&str, &str)]) -> TrailerSlot {
        let slot = TrailerSlot::default();
        slot.set(pairs.iter().copied().collect());
        slot
    }

    #[test]
    fn test_merge_replaces_per_key() {
        let slot = slot(&[("a", "1"), ("b", "1")]);
        slot.merge(&[("b", "2"), ("c", "2")].into_iter().collect());
        let trailers = slot.snapshot();
        assert_eq!(trailers.get("a"), Some("1"));
        assert_eq!(trailers.get_all("b"), ["2".to_string()]);
        assert_eq!(trailers.get("c"), Some("2"));
    }

    #[test]
    fn test_reserved_keys_are_not_copied() {
        let slot = slot(&[("grpc-status", "3"), ("size", "213")]);
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_STATUS, "0".parse().unwrap());
        slot.append_to(&mut headers);
        assert_eq!(headers.get_all(GRPC_STATUS).iter().count(), 1);
        assert_eq!(headers.get("size").unwrap(), "213");
    }

    #[tokio::test]
    async fn test_trailer_frame_gains_slot_entries() {
        let mut status = HeaderMap::new();
        status.insert(GRPC_STATUS, "0".parse().unwrap());
        let frames = vec![
            Ok::<_, Status>(Frame::data(Bytes::from_static(b"payload"))),
            Ok(Frame::trailers(status)),
        ];
        let body = StreamBody::new(stream::iter(frames)).boxed_unsync();
        let response = with_trailers(http::Response::new(body), slot(&[("size", "213")]));

        let collected = response.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned().unwrap();
        assert_eq!(trailers.get(GRPC_STATUS).unwrap(), "0");
        assert_eq!(trailers.get("size").unwrap(), "213");
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_trailers_only_response_gets_headers() {
        let mut response = http::Response::new(
            Full::new(Bytes::new())
                .map_err(|never| -> Status { match never {} })
                .boxed_unsync(),
        );
        response
            .headers_mut()
            .insert(GRPC_STATUS, "5".parse().unwrap());
        let response = with_trailers(response, slot(&[("hello", "trailer")]));
        assert_eq!(response.headers().get("hello").unwrap(), "trailer");
    }
}
