//! Inbound side of the transport: accept loop and per-connection exchange.
//!
//! Each accepted connection gets its own task, reads exactly one request,
//! writes exactly one response and is closed. A connection that sends
//! garbage, stalls, or disconnects early only loses itself; the accept loop
//! keeps going. At most `max_connections` tasks run at once; the accept loop
//! waits for a free slot before taking the next connection off the backlog.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use encore_core::{Request, Response};

use crate::rpc::{read_frame, write_frame};
use crate::service::RequestHandler;

/// Serve `handler` on an already-bound listener until `shutdown` fires.
///
/// Binding is left to the caller so a bind failure can be fatal at startup
/// and tests can bind ephemeral ports before building a roster.
pub async fn serve<H: RequestHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    read_timeout: Duration,
    max_connections: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let slots = Arc::new(Semaphore::new(max_connections.max(1)));
    tracing::info!(role = handler.role(), addr = %local, max_connections, "listening");

    loop {
        let permit = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(role = handler.role(), "listener shutting down");
                return;
            }

            permit = slots.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return,
            },
        };

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(role = handler.role(), "listener shutting down");
                return;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, handler, read_timeout).await;
                    drop(permit);
                });
            }
        }
    }
}

async fn handle_connection<H: RequestHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    read_timeout: Duration,
) {
    let peer_addr = peer.to_string();

    let request: Request =
        match tokio::time::timeout(read_timeout, read_frame(&mut stream, &peer_addr)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                tracing::warn!(peer = %peer_addr, error = %e, "dropping connection: bad request");
                return;
            }
            Err(_) => {
                tracing::warn!(peer = %peer_addr, ?read_timeout, "dropping connection: request read timed out");
                return;
            }
        };

    tracing::debug!(role = handler.role(), peer = %peer_addr, ?request, "request");
    let response: Response = handler.handle(request).await;
    tracing::debug!(role = handler.role(), peer = %peer_addr, ?response, "response");

    if let Err(e) = write_frame(&mut stream, &peer_addr, &response).await {
        tracing::warn!(peer = %peer_addr, error = %e, "failed to write response");
    }
}
