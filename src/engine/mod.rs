// mlmm-server/src/engine/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The calculation engine seam.
//!
//! The server does not know how a result is computed. It hands the input path
//! to an [`Engine`] and only cares whether the call finished or failed. Engines
//! are stateful (a loaded model, open scratch files) and are not assumed to be
//! safe for overlapping calls, so every invocation goes through an
//! [`EngineGate`], which holds the single execution lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex;

mod command;

pub use command::CommandEngine;

/// A failed calculation, reported to the client verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct EngineFailure {
    pub reason: String,
}

impl EngineFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Performs the calculation for one input file.
///
/// `run` is blocking and may take minutes; the gate moves it off the async
/// executor. Returning `Err` is the normal way to report a bad input.
pub trait Engine: Send + 'static {
    fn run(&mut self, input: &Path) -> Result<(), EngineFailure>;
}

impl<F> Engine for F
where
    F: FnMut(&Path) -> Result<(), EngineFailure> + Send + 'static,
{
    fn run(&mut self, input: &Path) -> Result<(), EngineFailure> {
        self(input)
    }
}

/// Exclusive access to the shared engine instance.
///
/// Cloning the gate shares the same engine and the same lock.
pub struct EngineGate<E> {
    engine: Arc<Mutex<E>>,
}

impl<E> Clone for EngineGate<E> {
    fn clone(&self) -> Self {
        Self { engine: Arc::clone(&self.engine) }
    }
}

impl<E: Engine> EngineGate<E> {
    pub fn new(engine: E) -> Self {
        Self { engine: Arc::new(Mutex::new(engine)) }
    }

    /// Runs the engine on `input`, waiting for any invocation already in flight.
    ///
    /// A panic inside the engine is reported as a failure; the lock is
    /// released either way.
    pub async fn invoke(&self, input: PathBuf) -> Result<(), EngineFailure> {
        let mut engine = Arc::clone(&self.engine).lock_owned().await;
        tracing::debug!("Engine lock acquired for {:?}", input);

        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || engine.run(&input)).await;
        tracing::debug!("Engine call finished in {:?}", started.elapsed());

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(EngineFailure::new(format!("engine panicked: {}", e))),
            Err(e) => Err(EngineFailure::new(format!("engine task was cancelled: {}", e))),
        }
    }
}
