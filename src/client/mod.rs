// mlmm-server/src/client/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-step client: hand one input path to the server and wait for the verdict.

use std::path::Path;

use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::discovery;
use crate::error::{MlmmError, Result as MlmmResult};
use crate::protocol::{framing, Command, Reply, ReplyFraming};

/// Replies are short tokens; anything bigger than this is not ours.
const MAX_REPLY_LEN: usize = 1024 * 1024;

/// A connection to a running server. Several requests may share it.
pub struct Client {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: WriteHalf<TcpStream>,
    reply_framing: ReplyFraming,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs, reply_framing: ReplyFraming) -> MlmmResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            reply_framing,
        })
    }

    /// Connects to the server advertised by the discovery files in `dir`.
    pub async fn discover(dir: &Path, host: &str, reply_framing: ReplyFraming) -> MlmmResult<Self> {
        let location = discovery::read(dir).await?;
        tracing::debug!("Discovered server pid {} on port {}", location.pid, location.port);
        Self::connect((host, location.port), reply_framing).await
    }

    /// Sends `mlmmrun:<input>` and blocks until the reply arrives.
    pub async fn run(&mut self, input: &Path) -> MlmmResult<Reply> {
        self.send_raw(&Command::run(input).to_payload()).await?;

        let payload = framing::read_message(&mut self.reader, MAX_REPLY_LEN)
            .await?
            .ok_or_else(|| {
                MlmmError::Protocol("server closed the connection without replying".to_string())
            })?;
        Reply::parse(&payload, self.reply_framing)
    }

    /// Sends an arbitrary framed payload without waiting for a reply.
    pub async fn send_raw(&mut self, payload: &str) -> MlmmResult<()> {
        framing::write_message(&mut self.writer, payload).await?;
        Ok(())
    }

    /// Closes the connection, ending the session on the server side.
    pub async fn close(mut self) -> MlmmResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// One-shot helper: connect, run `input`, disconnect.
pub async fn submit(
    addr: impl ToSocketAddrs,
    input: &Path,
    reply_framing: ReplyFraming,
) -> MlmmResult<Reply> {
    let mut client = Client::connect(addr, reply_framing).await?;
    let reply = client.run(input).await?;
    client.close().await?;
    Ok(reply)
}
