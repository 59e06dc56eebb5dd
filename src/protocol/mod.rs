// mlmm-server/src/protocol/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire protocol shared by the server and the per-step client.

pub mod framing;
pub mod message;

pub use message::{Command, Reply, ReplyFraming};
