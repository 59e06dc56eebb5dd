// mlmm-server/src/protocol/message.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MlmmError, Result as MlmmResult};
use crate::protocol::framing;

/// Command token sent by clients, followed by `:<path>`.
pub const RUN_TOKEN: &str = "mlmmrun";

/// Inner payload of a successful reply.
pub const FINISHED_TOKEN: &str = "mlmmfin";

/// Inner payload prefix of a failed reply, followed by `:<reason>`.
pub const FAILED_TOKEN: &str = "mlmmfail";

/// Commands accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Compute a result for the input file at the given path.
    RunCalculation(PathBuf),
}

impl Command {
    /// Parses a request payload of the form `mlmmrun:<path>`.
    ///
    /// Returns `None` for anything else, including an empty path.
    pub fn parse(payload: &str) -> Option<Command> {
        let (token, path) = payload.split_once(framing::DELIMITER)?;
        if token != RUN_TOKEN || path.is_empty() {
            return None;
        }
        Some(Command::RunCalculation(PathBuf::from(path)))
    }

    pub fn run(path: impl AsRef<Path>) -> Command {
        Command::RunCalculation(path.as_ref().to_path_buf())
    }

    /// Request payload, before outer framing.
    pub fn to_payload(&self) -> String {
        match self {
            Command::RunCalculation(path) => {
                format!("{}{}{}", RUN_TOKEN, framing::DELIMITER, path.to_string_lossy())
            }
        }
    }
}

/// How reply payloads are wrapped before the outer frame is added.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFraming {
    /// `<n>:<m>:mlmmfin`: the inner token is framed, then framed again on send.
    #[default]
    Double,
    /// `<n>:mlmmfin`: only the outer frame.
    Single,
}

/// Server answer to a [`Command::RunCalculation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure(String),
}

impl Reply {
    pub fn failure(reason: impl Into<String>) -> Reply {
        Reply::Failure(reason.into())
    }

    /// The token carried inside the reply: `mlmmfin` or `mlmmfail:<reason>`.
    pub fn inner_payload(&self) -> String {
        match self {
            Reply::Success => FINISHED_TOKEN.to_string(),
            Reply::Failure(reason) => format!("{}{}{}", FAILED_TOKEN, framing::DELIMITER, reason),
        }
    }

    /// Payload handed to [`framing::write_message`], which adds the outer frame.
    pub fn to_payload(&self, reply_framing: ReplyFraming) -> String {
        let inner = self.inner_payload();
        match reply_framing {
            ReplyFraming::Double => framing::encode(&inner),
            ReplyFraming::Single => inner,
        }
    }

    /// Inverse of [`Reply::to_payload`] for a payload already stripped of its outer frame.
    pub fn parse(payload: &str, reply_framing: ReplyFraming) -> MlmmResult<Reply> {
        let inner = match reply_framing {
            ReplyFraming::Double => {
                let (inner, rest) = framing::decode_str(payload)?;
                if !rest.is_empty() {
                    return Err(MlmmError::Protocol(format!(
                        "unexpected data after reply: {:?}",
                        rest
                    )));
                }
                inner
            }
            ReplyFraming::Single => payload,
        };
        Reply::from_inner(inner)
    }

    fn from_inner(inner: &str) -> MlmmResult<Reply> {
        if inner == FINISHED_TOKEN {
            return Ok(Reply::Success);
        }
        match inner.split_once(framing::DELIMITER) {
            Some((FAILED_TOKEN, reason)) => Ok(Reply::failure(reason)),
            _ => Err(MlmmError::Protocol(format!("unrecognised reply {:?}", inner))),
        }
    }
}
