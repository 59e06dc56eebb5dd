// mlmm-server/src/server/session.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! One client connection, from first request to disconnect.
//!
//! ```text
//! AwaitMessage ──frame──▶ Dispatch ──command──▶ Reply ──written──▶ AwaitMessage
//!      │                      │
//!      └─ EOF ─▶ Closed ◀─────┘ unrecognised
//! ```
//!
//! A framing or transport error aborts the session with an error. The
//! connection is closed on every exit path because both halves are owned here.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::engine::{Engine, EngineGate};
use crate::error::Result as MlmmResult;
use crate::protocol::{framing, Reply, ReplyFraming};

use super::dispatch::dispatch_command;

/// State shared by every session of one server.
pub struct SessionContext<E> {
    pub gate: EngineGate<E>,
    pub reply_framing: ReplyFraming,
    pub max_message_len: usize,
}

/// Why a session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its side between requests.
    ClientClosed,
    /// The client sent something other than a run command.
    UnrecognisedCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub replies: usize,
}

enum SessionState {
    AwaitMessage,
    Dispatch(String),
    Reply(Reply),
    Closed(SessionEnd),
}

/// Serves requests on `stream` until the client disconnects or sends an
/// unrecognised command.
pub async fn run_session<S, E>(stream: S, ctx: &SessionContext<E>) -> MlmmResult<SessionSummary>
where
    S: AsyncRead + AsyncWrite,
    E: Engine,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut replies = 0;
    let mut state = SessionState::AwaitMessage;

    let end = loop {
        state = match state {
            SessionState::AwaitMessage => {
                match framing::read_message(&mut reader, ctx.max_message_len).await? {
                    Some(payload) => {
                        tracing::trace!("Get request: {:?}", payload);
                        SessionState::Dispatch(payload)
                    }
                    None => {
                        tracing::trace!("Get EOF from client");
                        SessionState::Closed(SessionEnd::ClientClosed)
                    }
                }
            }
            SessionState::Dispatch(payload) => match dispatch_command(&payload, &ctx.gate).await {
                Some(reply) => SessionState::Reply(reply),
                None => SessionState::Closed(SessionEnd::UnrecognisedCommand),
            },
            SessionState::Reply(reply) => {
                let payload = reply.to_payload(ctx.reply_framing);
                tracing::trace!("Send response: {:?}", payload);
                framing::write_message(&mut writer, &payload).await?;
                replies += 1;
                SessionState::AwaitMessage
            }
            SessionState::Closed(end) => break end,
        };
    };

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Writer shutdown failed: {}", e);
    }
    Ok(SessionSummary { end, replies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFailure;
    use crate::error::MlmmError;
    use crate::protocol::framing::{FramingError, DEFAULT_MAX_MESSAGE_LEN};
    use std::path::Path;
    use tokio::io::{duplex, AsyncReadExt};

    fn stub_context(reply_framing: ReplyFraming) -> SessionContext<impl Engine> {
        SessionContext {
            gate: EngineGate::new(|input: &Path| -> Result<(), EngineFailure> {
                if input == Path::new("/x") {
                    Err(EngineFailure::new("bad input"))
                } else {
                    Ok(())
                }
            }),
            reply_framing,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Feeds `input` to a session, closes the client side, and returns what the server wrote.
    async fn exchange(input: &[u8], ctx: &SessionContext<impl Engine>) -> (MlmmResult<SessionSummary>, String) {
        let (mut client, server) = duplex(4096);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let result = run_session(server, ctx).await;

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        (result, output)
    }

    #[tokio::test]
    async fn test_session_success_then_eof() {
        let ctx = stub_context(ReplyFraming::Double);
        let (result, output) = exchange(b"10:mlmmrun:/y", &ctx).await;

        assert_eq!(output, "9:7:mlmmfin");
        assert_eq!(
            result.unwrap(),
            SessionSummary { end: SessionEnd::ClientClosed, replies: 1 }
        );
    }

    #[tokio::test]
    async fn test_session_continues_after_failure() {
        let ctx = stub_context(ReplyFraming::Double);
        let (result, output) = exchange(b"10:mlmmrun:/x10:mlmmrun:/y", &ctx).await;

        assert_eq!(output, "21:18:mlmmfail:bad input9:7:mlmmfin");
        assert_eq!(result.unwrap().replies, 2);
    }

    #[tokio::test]
    async fn test_session_single_framing() {
        let ctx = stub_context(ReplyFraming::Single);
        let (_, output) = exchange(b"10:mlmmrun:/x", &ctx).await;

        assert_eq!(output, "18:mlmmfail:bad input");
    }

    #[tokio::test]
    async fn test_session_unrecognised_command_closes_without_reply() {
        let ctx = stub_context(ReplyFraming::Double);
        let (result, output) = exchange(b"4:quit10:mlmmrun:/y", &ctx).await;

        assert!(output.is_empty());
        assert_eq!(
            result.unwrap(),
            SessionSummary { end: SessionEnd::UnrecognisedCommand, replies: 0 }
        );
    }

    #[tokio::test]
    async fn test_session_truncated_frame_is_error() {
        let ctx = stub_context(ReplyFraming::Double);
        let (result, output) = exchange(b"10:mlmm", &ctx).await;

        assert!(output.is_empty());
        assert!(matches!(
            result,
            Err(MlmmError::Framing(FramingError::Truncated { expected: 10, received: 4 }))
        ));
    }

    #[tokio::test]
    async fn test_session_immediate_eof() {
        let ctx = stub_context(ReplyFraming::Double);
        let (result, output) = exchange(b"", &ctx).await;

        assert!(output.is_empty());
        assert_eq!(
            result.unwrap(),
            SessionSummary { end: SessionEnd::ClientClosed, replies: 0 }
        );
    }
}
