// mlmm-server/src/server/dispatch.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Command dispatching for the calculation protocol.
//!
//! Maps a decoded request payload to an engine invocation and translates the
//! outcome into a [`Reply`]. The entry point is [`dispatch_command`], called
//! by the session for every message it receives.

use std::path::PathBuf;

use crate::engine::{Engine, EngineGate};
use crate::protocol::{Command, Reply};

/// Dispatches one request payload.
///
/// Returns `None` when the payload is not a recognised command; the session
/// then ends without replying. Engine failures never escape: they become
/// [`Reply::Failure`] carrying the reason verbatim.
pub async fn dispatch_command<E: Engine>(payload: &str, gate: &EngineGate<E>) -> Option<Reply> {
    match Command::parse(payload) {
        Some(Command::RunCalculation(path)) => Some(handle_run(path, gate).await),
        None => {
            tracing::warn!("Unrecognised command {:?}, closing session", payload);
            None
        }
    }
}

/// Handles `mlmmrun:<path>`.
async fn handle_run<E: Engine>(path: PathBuf, gate: &EngineGate<E>) -> Reply {
    tracing::info!("Running calculation for {}", path.display());

    match gate.invoke(path.clone()).await {
        Ok(()) => {
            tracing::info!("Calculation finished for {}", path.display());
            Reply::Success
        }
        Err(failure) => {
            tracing::warn!("Calculation failed for {}: {}", path.display(), failure);
            Reply::Failure(failure.reason)
        }
    }
}
