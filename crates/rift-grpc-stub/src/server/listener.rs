//! Accept loop and per-connection HTTP/2 serving.

use super::router::ServiceRegistry;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Accept connections until `shutdown` flips, then give open connections
/// `grace` to drain before aborting them.
pub(crate) async fn serve(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    registry: ServiceRegistry,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    let local_addr = listener.local_addr().ok();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            remote_addr,
                            acceptor.clone(),
                            registry.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error on {:?}: {}", local_addr, e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => {
                info!("Stub server on {:?} shutting down", local_addr);
                break;
            }
        }
    }
    drop(listener);

    let drained = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "Grace period of {:?} elapsed, aborting {} connection(s)",
            grace,
            connections.len()
        );
        connections.shutdown().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    registry: ServiceRegistry,
    shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_http2(tls_stream, remote_addr, registry, shutdown).await,
            Err(e) => debug!("TLS handshake with {} failed: {}", remote_addr, e),
        },
        None => serve_http2(stream, remote_addr, registry, shutdown).await,
    }
}

async fn serve_http2<IO>(
    io: IO,
    remote_addr: SocketAddr,
    registry: ServiceRegistry,
    mut shutdown: watch::Receiver<bool>,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| {
        let registry = registry.clone();
        async move { Ok::<_, Infallible>(registry.route(request).await) }
    });

    let conn = http2::Builder::new(TokioExecutor::new()).serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection error from {}: {}", remote_addr, e);
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                // Sends GOAWAY; in-flight streams run to completion.
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
