// mlmm-server/src/error/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Centralized error handling for the calculation server.
//!
//! Uses `thiserror` to define structured errors and `anyhow` for convenient propagation.
//! Library modules return `Result<T, MlmmError>`; the binary uses
//! `anyhow::Result<T>` (re-exported as [`AnyResult`]) at the top level.
//!
//! Calculation failures are deliberately absent here: the engine reports them
//! as [`crate::engine::EngineFailure`] values, which the session turns into
//! failure replies instead of propagating them.

use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

use crate::protocol::framing::FramingError;

/// The root error type for all server and client failures.
#[derive(Error, Debug)]
pub enum MlmmError {
    /// General-purpose error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (connection reset, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with associated path for better diagnostics
    #[error("I/O error at {path:?}: {source}")]
    IoWithPath {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Malformed length prefix or truncated payload on the wire.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// The listening socket could not be bound (address taken or invalid host).
    #[error("Cannot bind to {address}: {source}")]
    AddressInUse {
        address: String,
        source: std::io::Error,
    },

    /// Configuration loading or parsing error.
    #[error("Config error: {0}")]
    Config(String),

    /// Discovery files are missing or unreadable.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A well-framed message carried an unexpected payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Task join error.
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
}

impl MlmmError {
    /// Creates an `IoWithPath` error from a path and an I/O error.
    pub fn io_with_path<E: Into<std::io::Error>>(path: impl Into<PathBuf>, source: E) -> Self {
        Self::IoWithPath {
            source: source.into(),
            path: path.into(),
        }
    }
}

/// Convenient alias for `Result<T, MlmmError>`.
pub type Result<T> = std::result::Result<T, MlmmError>;

pub use anyhow::Result as AnyResult;
