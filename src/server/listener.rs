// mlmm-server/src/server/listener.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! TCP listener: binding with an explicit backlog and the accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;

use crate::engine::Engine;
use crate::error::{MlmmError, Result as MlmmResult};

use super::session::{run_session, SessionContext, SessionEnd};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Binds `host:port` and starts listening with the given backlog.
///
/// Every failure here, including an unresolvable host, is reported as
/// [`MlmmError::AddressInUse`].
pub async fn bind(host: &str, port: u16, backlog: u32) -> MlmmResult<TcpListener> {
    let address = format!("{}:{}", host, port);
    let bind_error = |source: io::Error| MlmmError::AddressInUse {
        address: address.clone(),
        source,
    };

    let addr: SocketAddr = lookup_host((host, port))
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    // Allows a quick restart while old connections sit in TIME_WAIT; an
    // address with a live listener is still refused.
    #[cfg(unix)]
    socket.set_reuseaddr(true).map_err(bind_error)?;

    socket.bind(addr).map_err(bind_error)?;
    let listener = socket.listen(backlog).map_err(bind_error)?;
    tracing::debug!("Bind server to {} (backlog {})", addr, backlog);

    Ok(listener)
}

/// Runs the accept loop until a shutdown signal arrives.
///
/// In sequential mode each session runs to completion before the next
/// `accept`; pending clients wait in the OS backlog. In concurrent mode each
/// connection gets its own task and only engine calls are serialised.
pub async fn run_server_loop<E: Engine>(
    listener: TcpListener,
    ctx: Arc<SessionContext<E>>,
    concurrent: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> MlmmResult<()> {
    tracing::info!("Starting server listener");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        tracing::info!("Get new connection from {}", peer);
                        if concurrent {
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                serve_connection(stream, peer, &ctx).await;
                            });
                        } else {
                            tokio::select! {
                                _ = serve_connection(stream, peer, &ctx) => {}
                                _ = shutdown_rx.recv() => {
                                    tracing::debug!("Shutdown signal received during session with {}", peer);
                                    break;
                                }
                            }
                        }
                    },
                    Err(e) => {
                        tracing::error!("Listener accept error: {:?}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("Listener received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}

/// Runs one session and logs how it ended. Errors stop at this boundary.
async fn serve_connection<E: Engine>(stream: TcpStream, peer: SocketAddr, ctx: &SessionContext<E>) {
    match run_session(stream, ctx).await {
        Ok(summary) => match summary.end {
            SessionEnd::ClientClosed => {
                tracing::info!("Client {} disconnected after {} replies", peer, summary.replies)
            }
            SessionEnd::UnrecognisedCommand => {
                tracing::info!("Session with {} ended on unrecognised command", peer)
            }
        },
        Err(MlmmError::Framing(e)) => {
            tracing::warn!("Dropping connection from {}: {}", peer, e);
        }
        Err(e) => {
            tracing::error!("Connection handler error for {}: {:?}", peer, e);
        }
    }
}
