//! The stub server.
//!
//! A [`StubServer`] serves every method found in its descriptors over
//! HTTP/2 (optionally TLS) and answers calls from its ordered matcher list.
//!
//! ```ignore
//! let server = StubServer::builder()
//!     .descriptor_set(DESCRIPTOR_SET)
//!     .start()
//!     .await?;
//! server.method("GetFeature").response(json!({"name": "hello"}));
//!
//! let mut client = RouteGuideClient::new(server.conn()?);
//! ```

mod listener;
mod router;
mod tls;

pub use router::ServiceRegistry;
pub use tls::{create_tls_acceptor, NoVerifier, TlsMaterial};

use crate::dispatch::Dispatcher;
use crate::error::{Result, StubError};
use crate::generator::Generator;
use crate::matcher::Matcher;
use crate::request::Request;
use crate::schema::SchemaRegistry;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use prost_reflect::DescriptorPool;
use router::{HEALTH, REFLECTION_V1, REFLECTION_V1ALPHA};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tower::util::BoxCloneService;
use tracing::{info, warn};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

enum DescriptorSource {
    Bytes(Vec<u8>),
    File(PathBuf),
    Pool(DescriptorPool),
}

/// Configures and starts a [`StubServer`].
pub struct StubServerBuilder {
    sources: Vec<DescriptorSource>,
    listen_addr: SocketAddr,
    tls: Option<TlsMaterial>,
    health_check: bool,
    reflection: bool,
    grace_period: Duration,
}

impl Default for StubServerBuilder {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            tls: None,
            health_check: false,
            reflection: true,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl StubServerBuilder {
    /// Add an encoded `FileDescriptorSet`.
    pub fn descriptor_set(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.sources.push(DescriptorSource::Bytes(bytes.into()));
        self
    }

    /// Add a `FileDescriptorSet` file, as written by
    /// `protoc --include_imports --descriptor_set_out`.
    pub fn descriptor_set_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(DescriptorSource::File(path.into()));
        self
    }

    pub fn descriptor_pool(mut self, pool: DescriptorPool) -> Self {
        self.sources.push(DescriptorSource::Pool(pool));
        self
    }

    /// Address to bind; defaults to `127.0.0.1:0`.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    /// Serve `grpc.health.v1.Health`, reporting every service as serving.
    pub fn enable_health_check(mut self) -> Self {
        self.health_check = true;
        self
    }

    pub fn disable_reflection(mut self) -> Self {
        self.reflection = false;
        self
    }

    /// How long `close()` lets open calls finish before aborting them.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Load the descriptors, bind the listener and start serving.
    pub async fn start(self) -> Result<StubServer> {
        let mut schema = SchemaRegistry::new();
        for source in self.sources {
            match source {
                DescriptorSource::Bytes(bytes) => schema.add_file_descriptor_set(&bytes)?,
                DescriptorSource::File(path) => schema.add_file_descriptor_set_file(path)?,
                DescriptorSource::Pool(pool) => schema.add_pool(&pool)?,
            };
        }

        let dispatcher = Arc::new(Dispatcher::new());
        let mut registry = ServiceRegistry::new(dispatcher.register(schema.methods()));

        if self.reflection {
            let set = schema.file_descriptor_set();
            let v1 = tonic_reflection::server::Builder::configure()
                .register_file_descriptor_set(set.clone())
                .build_v1()?;
            let v1alpha = tonic_reflection::server::Builder::configure()
                .register_file_descriptor_set(set)
                .build_v1alpha()?;
            registry.add_service(REFLECTION_V1, BoxCloneService::new(v1));
            registry.add_service(REFLECTION_V1ALPHA, BoxCloneService::new(v1alpha));
        }

        let health = if self.health_check {
            let (mut reporter, health_service) = tonic_health::server::health_reporter();
            // The empty name stands for the server as a whole.
            let names: Vec<String> = std::iter::once(String::new())
                .chain(schema.services().map(|service| service.full_name().to_string()))
                .collect();
            for name in names {
                reporter
                    .set_service_status(name, ServingStatus::Serving)
                    .await;
            }
            registry.add_service(HEALTH, BoxCloneService::new(health_service));
            Some(reporter)
        } else {
            None
        };

        let acceptor = self
            .tls
            .as_ref()
            .map(create_tls_acceptor)
            .transpose()
            .map_err(|e| StubError::Tls(format!("{e:#}")))?;

        let listener = TcpListener::bind(self.listen_addr).await?;
        let addr = listener.local_addr()?;
        info!(
            "Stub server bound to {} ({} methods, tls: {})",
            addr,
            registry.len(),
            acceptor.is_some()
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener::serve(
            listener,
            acceptor,
            registry,
            shutdown_rx,
            self.grace_period,
        ));

        Ok(StubServer {
            addr,
            pool: schema.pool().clone(),
            dispatcher,
            tls: self.tls,
            shutdown,
            task: Mutex::new(Some(task)),
            channel: Mutex::new(None),
            _health: health,
        })
    }
}

/// A running stub server.
///
/// Dropping the server signals shutdown without waiting; call
/// [`StubServer::close`] to wait for connections to drain.
pub struct StubServer {
    addr: SocketAddr,
    pool: DescriptorPool,
    dispatcher: Arc<Dispatcher>,
    tls: Option<TlsMaterial>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    channel: Mutex<Option<Channel>>,
    _health: Option<HealthReporter>,
}

impl StubServer {
    pub fn builder() -> StubServerBuilder {
        StubServerBuilder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Descriptors the server was started with.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    // ========================================================================
    // Matchers
    // ========================================================================

    /// Register a matcher built elsewhere, honouring [`StubServer::prepend`].
    pub fn add_matcher(&self, matcher: Matcher) -> Matcher {
        self.dispatcher.add_matcher(matcher)
    }

    /// Register a matcher with one predicate.
    pub fn matches<F>(&self, predicate: F) -> Matcher
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.dispatcher.add_matcher(Matcher::new().matches(predicate))
    }

    pub fn service(&self, service: impl Into<String>) -> Matcher {
        self.dispatcher.add_matcher(Matcher::new().service(service))
    }

    pub fn method(&self, method: impl Into<String>) -> Matcher {
        self.dispatcher.add_matcher(Matcher::new().method(method))
    }

    /// Register a matcher that accepts every call and answers with
    /// generated messages.
    pub fn response_dynamic(&self, generators: impl IntoIterator<Item = Generator>) -> Matcher {
        self.dispatcher
            .add_matcher(Matcher::new().response_dynamic(generators))
    }

    /// Give the next registered matcher priority over all existing ones.
    pub fn prepend(&self) -> &Self {
        self.dispatcher.prepend();
        self
    }

    /// Requests accepted by any matcher, in arrival order.
    pub fn requests(&self) -> Vec<Arc<Request>> {
        self.dispatcher.requests()
    }

    /// Requests no matcher accepted, in arrival order.
    pub fn unmatched_requests(&self) -> Vec<Arc<Request>> {
        self.dispatcher.unmatched_requests()
    }

    // ========================================================================
    // Client and lifecycle
    // ========================================================================

    /// A client channel to this server, created on first use and cached.
    ///
    /// Must be called within a Tokio runtime.
    pub fn conn(&self) -> Result<Channel> {
        let mut cached = self.channel.lock();
        if let Some(channel) = cached.as_ref() {
            return Ok(channel.clone());
        }

        let channel = match &self.tls {
            None => Endpoint::from_shared(format!("http://{}", self.addr))?.connect_lazy(),
            Some(material) => {
                let (connector, server_name) = tls::create_tls_connector(material)
                    .map_err(|e| StubError::Tls(format!("{e:#}")))?;
                let addr = self.addr;
                // The connector owns TLS, so the URI stays plain `http`.
                let endpoint = Endpoint::from_shared(format!(
                    "http://{}:{}",
                    material.server_name,
                    addr.port()
                ))?;
                endpoint.connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
                    let connector = connector.clone();
                    let server_name = server_name.clone();
                    async move {
                        let tcp = TcpStream::connect(addr).await?;
                        let stream = connector.connect(server_name, tcp).await?;
                        Ok::<_, std::io::Error>(TokioIo::new(stream))
                    }
                }))
            }
        };
        *cached = Some(channel.clone());
        Ok(channel)
    }

    /// Drop the cached client, stop accepting, let open calls finish within
    /// the grace period and abort the rest.
    pub async fn close(&self) {
        self.channel.lock().take();
        let _ = self.shutdown.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Stub server on {} did not stop cleanly: {}", self.addr, e);
            }
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
