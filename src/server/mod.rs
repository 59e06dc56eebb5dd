// mlmm-server/src/server/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The calculation server: bind, publish discovery files, then accept clients.
//!
//! Control flow:
//! 1. [`listener::bind`] the configured host/port with the backlog `num_clients`;
//! 2. [`discovery::publish`] pid and bound port (only after a successful bind);
//! 3. run the accept loop in a background task, one [`session`] per connection.
//!
//! The loop never stops on its own. [`ServerHandle::shutdown`] exists for
//! embedding and tests; the binary simply waits on [`ServerHandle::wait`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::discovery::{self, ServerLocation};
use crate::engine::{Engine, EngineGate};
use crate::error::Result as MlmmResult;

pub mod dispatch;
pub mod listener;
pub mod session;

use session::SessionContext;

pub struct ServerHandle {
    local_addr: SocketAddr,
    location: ServerLocation,
    shutdown_tx: Option<broadcast::Sender<()>>,
    join_handle: Option<JoinHandle<MlmmResult<()>>>,
}

impl ServerHandle {
    /// The address actually bound (the real port when configured with 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// What was written to the discovery files.
    pub fn location(&self) -> ServerLocation {
        self.location
    }

    /// Stops accepting connections and waits for the accept loop to finish.
    pub async fn shutdown(mut self) -> MlmmResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("Sending shutdown signal to server");
        }
        self.join().await
    }

    /// Waits until the accept loop ends, which in practice means forever.
    pub async fn wait(mut self) -> MlmmResult<()> {
        self.join().await
    }

    async fn join(&mut self) -> MlmmResult<()> {
        match self.join_handle.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
                tracing::debug!("Sending shutdown signal to server on drop");
            }
        }
    }
}

/// Binds, publishes the discovery files and starts serving with `engine`.
///
/// # Errors
///
/// Returns [`crate::MlmmError::AddressInUse`] when the address cannot be bound;
/// no discovery files are written in that case. Failing to write the
/// discovery files is also fatal.
pub async fn start<E: Engine>(config: &ServerConfig, engine: E) -> MlmmResult<ServerHandle> {
    let listener = listener::bind(&config.host, config.port, config.num_clients).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", local_addr);

    let location = discovery::publish(&config.discovery_dir, local_addr.port()).await?;

    let ctx = Arc::new(SessionContext {
        gate: EngineGate::new(engine),
        reply_framing: config.reply_framing,
        max_message_len: config.max_message_len,
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let concurrent = config.concurrent_sessions;
    let join_handle = tokio::spawn(listener::run_server_loop(listener, ctx, concurrent, shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        location,
        shutdown_tx: Some(shutdown_tx),
        join_handle: Some(join_handle),
    })
}
