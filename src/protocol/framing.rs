// mlmm-server/src/protocol/framing.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Length-prefixed text framing: `<decimal-length>:<payload>`.
//!
//! The length counts the Unicode scalar values of the payload, not bytes, and
//! the prefix ends at the first `:`. No escaping is performed: anything after
//! the prefix belongs to the payload, colons included.
//!
//! Two flavours are provided:
//! - [`read_message`] / [`write_message`] work on async byte streams;
//! - [`encode`] / [`decode_str`] work on in-memory strings, which is how the
//!   inner frame of a double-wrapped reply is produced and unpacked.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Separates the length prefix from the payload.
pub const DELIMITER: char = ':';

/// Default upper bound for a declared payload length.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024; // 64 KB

/// `usize::MAX` has 20 decimal digits; anything longer cannot be a valid length.
const MAX_PREFIX_DIGITS: usize = 20;

/// Errors produced while decoding a frame.
#[derive(Error, Debug)]
pub enum FramingError {
    /// The characters before `:` are not a non-negative decimal integer.
    #[error("invalid length prefix {0:?}")]
    InvalidLength(String),

    /// No `:` was found within the maximum prefix width.
    #[error("length prefix longer than {} digits", MAX_PREFIX_DIGITS)]
    LengthPrefixTooLong,

    /// The declared length exceeds the configured limit.
    #[error("declared length {declared} exceeds the limit of {limit}")]
    TooLarge { declared: usize, limit: usize },

    /// The stream ended inside the length prefix.
    #[error("stream closed inside the length prefix")]
    TruncatedPrefix,

    /// The stream ended before the declared number of characters arrived.
    #[error("expected {expected} characters, stream closed after {received}")]
    Truncated { expected: usize, received: usize },

    /// An in-memory frame has no `:` at all.
    #[error("missing '{}' after the length prefix", DELIMITER)]
    MissingDelimiter,

    /// The payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frames `payload` as `"<chars>:<payload>"`.
pub fn encode(payload: &str) -> String {
    format!("{}{}{}", payload.chars().count(), DELIMITER, payload)
}

/// Splits one frame off the front of `input`.
///
/// Returns the payload and whatever follows it. Trailing data is not an
/// error here; callers that expect exactly one frame check the remainder.
pub fn decode_str(input: &str) -> Result<(&str, &str), FramingError> {
    let (prefix, rest) = input
        .split_once(DELIMITER)
        .ok_or(FramingError::MissingDelimiter)?;
    let declared = parse_length(prefix.as_bytes())?;

    let end = match rest.char_indices().nth(declared) {
        Some((offset, _)) => offset,
        None => {
            let received = rest.chars().count();
            if received < declared {
                return Err(FramingError::Truncated { expected: declared, received });
            }
            rest.len()
        }
    };

    Ok(rest.split_at(end))
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first prefix
/// byte, which is how a client signals it is done. Wrap raw sockets in a
/// `BufReader`: the codec pulls one byte at a time.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> Result<Option<String>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = Vec::with_capacity(8);
    loop {
        match read_byte(reader).await? {
            None if prefix.is_empty() => return Ok(None),
            None => return Err(FramingError::TruncatedPrefix),
            Some(b':') => break,
            Some(byte) => {
                if prefix.len() >= MAX_PREFIX_DIGITS {
                    return Err(FramingError::LengthPrefixTooLong);
                }
                prefix.push(byte);
            }
        }
    }

    let declared = parse_length(&prefix)?;
    if declared > max_len {
        return Err(FramingError::TooLarge { declared, limit: max_len });
    }

    let mut payload = String::with_capacity(declared);
    for received in 0..declared {
        let Some(lead) = read_byte(reader).await? else {
            return Err(FramingError::Truncated { expected: declared, received });
        };
        let width = utf8_width(lead).ok_or(FramingError::InvalidUtf8)?;

        let mut buf = [lead, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            *slot = read_byte(reader).await?.ok_or(FramingError::Truncated {
                expected: declared,
                received,
            })?;
        }
        let ch = std::str::from_utf8(&buf[..width]).map_err(|_| FramingError::InvalidUtf8)?;
        payload.push_str(ch);
    }

    Ok(Some(payload))
}

/// Frames `payload` and writes it to `writer`, flushing afterwards.
pub async fn write_message<W>(writer: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encode(payload).as_bytes()).await?;
    writer.flush().await
}

fn parse_length(prefix: &[u8]) -> Result<usize, FramingError> {
    let invalid = || FramingError::InvalidLength(String::from_utf8_lossy(prefix).into_owned());
    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    // Digits are valid UTF-8; `parse` still rejects values above usize::MAX.
    std::str::from_utf8(prefix)
        .map_err(|_| invalid())?
        .parse::<usize>()
        .map_err(|_| invalid())
}

async fn read_byte<R>(reader: &mut R) -> std::io::Result<Option<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}
