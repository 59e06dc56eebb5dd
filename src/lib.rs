// mlmm-server/src/lib.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A long-lived calculation server for per-step clients.
//!
//! A client hands over one unit of work ("compute a result for the input at
//! this path") and blocks until the server answers with a completion or
//! failure line. Messages use a `<length>:<payload>` text framing over TCP.
//! On startup the server publishes its process id and bound port to
//! `mlmm_pid.txt` / `mlmm_port.txt` so independently launched clients can find it.

pub mod client;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod log;
pub mod protocol;
pub mod server;

pub use error::{MlmmError, Result};
