//! Path-based routing of gRPC calls.

use crate::dispatch::MethodHandler;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use hyper::body::Incoming;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tonic::body::BoxBody;
use tower::util::BoxCloneService;
use tower::ServiceExt;

pub(crate) const REFLECTION_V1: &str = "/grpc.reflection.v1.ServerReflection/";
pub(crate) const REFLECTION_V1ALPHA: &str = "/grpc.reflection.v1alpha.ServerReflection/";
pub(crate) const HEALTH: &str = "/grpc.health.v1.Health/";

const GRPC_STATUS: &str = "grpc-status";
const UNIMPLEMENTED: &str = "12";

/// A generated tonic service (reflection, health) erased to one type.
pub(crate) type GrpcService =
    BoxCloneService<http::Request<Incoming>, http::Response<BoxBody>, Infallible>;

/// Maps request paths to schema method handlers and built-in services.
///
/// Cloned into every connection; the handler table is shared.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    methods: Arc<HashMap<String, Arc<MethodHandler>>>,
    services: Vec<(&'static str, GrpcService)>,
}

impl ServiceRegistry {
    pub fn new(methods: HashMap<String, Arc<MethodHandler>>) -> Self {
        Self {
            methods: Arc::new(methods),
            services: Vec::new(),
        }
    }

    /// Serve every path starting with `prefix` (`/package.Service/`) with
    /// `service`.
    pub(crate) fn add_service(&mut self, prefix: &'static str, service: GrpcService) {
        self.services.push((prefix, service));
    }

    pub fn has_method(&self, path: &str) -> bool {
        self.methods.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Answer one HTTP/2 request.
    pub async fn route(self, request: http::Request<Incoming>) -> http::Response<BoxBody> {
        let path = request.uri().path().to_string();
        if let Some(handler) = self.methods.get(&path).cloned() {
            return handler.serve(request).await;
        }

        let service = self
            .services
            .into_iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, service)| service);
        match service {
            Some(service) => match service.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
            None => unimplemented(),
        }
    }
}

/// Trailers-only `Unimplemented` answer for unknown paths.
pub(crate) fn unimplemented() -> http::Response<BoxBody> {
    let mut response = http::Response::new(tonic::body::empty_body());
    let headers = response.headers_mut();
    headers.insert(GRPC_STATUS, HeaderValue::from_static(UNIMPLEMENTED));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    response
}
