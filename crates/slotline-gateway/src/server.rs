//! HTTP listener.
//!
//! Accepts connections and serves each one with hyper's HTTP/1 server.
//! On SIGINT the listener stops accepting, waits for open connections to
//! finish, and returns.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::http::Gateway;

/// Binds to `addr` and runs the accept loop until ctrl-c.
///
/// At most `max_connections` are served at once; excess clients are
/// dropped immediately.
pub async fn run(
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    max_connections: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    info!("listening on http://{addr} (max {max_connections} connections)");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, draining connections...");
                break;
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    warn!("connection limit reached, dropping connection from {peer}");
                    continue;
                };

                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let gateway = Arc::clone(&gateway);
                        async move { gateway.handle(req).await }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("http connection error from {peer}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    info!("waiting for active connections to close...");
    let _ = semaphore.acquire_many(max_connections as u32).await;
    info!("all connections drained");

    Ok(())
}
