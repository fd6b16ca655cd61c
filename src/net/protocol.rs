//! Wire format shared by remote workers and the network consumer.
//!
//! Every message unit starts with a token: the text of its value,
//! right-justified with spaces to a fixed width that both ends agree on.
//! The receiver reads exactly that many bytes and trims. Variable-length
//! payloads are always preceded by a size token.
//!
//! ```text
//! worker -> server   "ready"
//! server -> worker   "compute" <size> <payload>      or   "timeout"
//! worker -> server   "result" <fitness> <dirty> <size> <payload>
//! ```
//!
//! One request per connection; whoever finishes last closes it.

use std::io::IoSlice;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::model::ChannelId;

pub const DEFAULT_TOKEN_WIDTH: usize = 64;

/// Smallest width that still fits every command and any `f64` in exponent form.
pub const MIN_TOKEN_WIDTH: usize = 32;

/// Commands understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Worker asks for an item.
    Ready,
    /// Server answers with an item.
    Compute,
    /// Worker returns an evaluated item.
    Result,
    /// Server has nothing to hand out right now.
    Idle,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Compute => "compute",
            Self::Result => "result",
            Self::Idle => "timeout",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ready" => Some(Self::Ready),
            "compute" => Some(Self::Compute),
            "result" => Some(Self::Result),
            "timeout" => Some(Self::Idle),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Right-justify `value` to `width` bytes.
pub fn encode_token(value: &str, width: usize) -> Result<Vec<u8>> {
    if !value.is_ascii() {
        return Err(Error::Protocol(format!("token {value:?} is not ascii")));
    }
    if value.len() > width {
        return Err(Error::Protocol(format!(
            "token {value:?} does not fit width {width}"
        )));
    }
    Ok(format!("{value:>width$}").into_bytes())
}

pub fn decode_token(bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Protocol("token is not valid utf-8".to_string()))?;
    Ok(text.trim().to_string())
}

pub fn command_token(command: Command, width: usize) -> Result<Vec<u8>> {
    encode_token(command.as_str(), width)
}

/// Fitness in exponent form: any `f64` fits and parses back bit-identical.
pub fn format_fitness(fitness: f64) -> String {
    format!("{fitness:e}")
}

pub fn parse_fitness(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::Protocol(format!("bad fitness token {token:?}")))
}

pub fn format_dirty(dirty: bool) -> &'static str {
    if dirty { "true" } else { "false" }
}

pub fn parse_dirty(token: &str) -> Result<bool> {
    match token {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::Protocol(format!("bad dirty token {token:?}"))),
    }
}

pub fn parse_size(token: &str, limit: usize) -> Result<usize> {
    let size: usize = token
        .parse()
        .map_err(|_| Error::Protocol(format!("bad size token {token:?}")))?;
    if size > limit {
        return Err(Error::Protocol(format!(
            "payload of {size} bytes exceeds limit of {limit}"
        )));
    }
    Ok(size)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Prefix a payload with the channel it belongs to, so a result can find its
/// way home without the worker understanding anything about it.
pub fn wrap(id: ChannelId, payload: &[u8]) -> Vec<u8> {
    let mut envelope = Vec::with_capacity(8 + payload.len());
    envelope.extend_from_slice(&id.to_be_bytes());
    envelope.extend_from_slice(payload);
    envelope
}

pub fn unwrap(mut envelope: Vec<u8>) -> Result<(ChannelId, Vec<u8>)> {
    if envelope.len() < 8 {
        return Err(Error::Protocol(format!(
            "envelope of {} bytes has no channel id",
            envelope.len()
        )));
    }
    let payload = envelope.split_off(8);
    let mut id = [0u8; 8];
    id.copy_from_slice(&envelope);
    Ok((ChannelId::from_be_bytes(id), payload))
}

// ---------------------------------------------------------------------------
// I/O
// ---------------------------------------------------------------------------

pub async fn read_token<R: AsyncRead + Unpin>(reader: &mut R, width: usize) -> Result<String> {
    let mut buf = vec![0u8; width];
    reader.read_exact(&mut buf).await?;
    decode_token(&buf)
}

pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R, width: usize) -> Result<Command> {
    let token = read_token(reader, width).await?;
    Command::parse(&token).ok_or_else(|| Error::Protocol(format!("unknown command {token:?}")))
}

/// Read a size token followed by that many payload bytes.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    width: usize,
    limit: usize,
) -> Result<Vec<u8>> {
    let size = parse_size(&read_token(reader, width).await?, limit)?;
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write all parts with as few syscalls as the socket allows.
pub async fn write_gathered<W: AsyncWrite + Unpin>(writer: &mut W, parts: &[&[u8]]) -> Result<()> {
    let mut slices: Vec<IoSlice<'_>> = parts.iter().map(|part| IoSlice::new(part)).collect();
    let mut remaining: &mut [IoSlice<'_>] = &mut slices;
    while !remaining.is_empty() {
        let written = writer.write_vectored(remaining).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        IoSlice::advance_slices(&mut remaining, written);
    }
    writer.flush().await?;
    Ok(())
}

/// `compute` + size + payload.
pub async fn write_work<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8], width: usize) -> Result<()> {
    let command = command_token(Command::Compute, width)?;
    let size = encode_token(&payload.len().to_string(), width)?;
    write_gathered(writer, &[&command, &size, payload]).await
}

/// `result` + fitness + dirty + size + payload.
pub async fn write_result<W: AsyncWrite + Unpin>(
    writer: &mut W,
    fitness: f64,
    dirty: bool,
    payload: &[u8],
    width: usize,
) -> Result<()> {
    let command = command_token(Command::Result, width)?;
    let fitness = encode_token(&format_fitness(fitness), width)?;
    let dirty = encode_token(format_dirty(dirty), width)?;
    let size = encode_token(&payload.len().to_string(), width)?;
    write_gathered(writer, &[&command, &fitness, &dirty, &size, payload]).await
}

pub async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: Command, width: usize) -> Result<()> {
    let token = command_token(command, width)?;
    write_gathered(writer, &[&token]).await
}
