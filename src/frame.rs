//! Length-prefixed message framing over a worker's standard I/O.
//!
//! Each direction of the pipe carries the same envelope:
//!
//! ```text
//! <ascii-decimal length><LF><payload bytes>
//! ```
//!
//! The payload is moved in [`PIPE_CHUNK_SIZE`] chunks so a single message
//! cannot monopolize the OS pipe buffer; chunking is only a flush cadence and
//! the peer may split the stream however it likes.
//!
//! Besides payload frames the pipe carries two control sequences:
//!
//! - the child's startup handshake, the exact line `ok\n` ([`read_handshake`]),
//! - a bare LF from the supervisor, which asks the child to shut down
//!   cleanly ([`write_shutdown`]).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PoolError, Result};

/// Chunk size (in bytes) for moving payloads across a pipe. Larger values
/// mean fewer writes for big messages, at the risk of running into transport
/// limits.
/// <https://unix.stackexchange.com/questions/11946/how-big-is-the-pipe-buffer>
pub const PIPE_CHUNK_SIZE: usize = 2048;

/// Upper bound accepted for a single framed message.
pub const MAX_MESSAGE_SIZE: usize = 1 << 30;

/// Write one framed message: the payload length as ASCII digits, an LF, then
/// the payload in [`PIPE_CHUNK_SIZE`] chunks. Flushes the writer.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\n", payload.len()).as_bytes())
        .await?;
    for chunk in payload.chunks(PIPE_CHUNK_SIZE) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. End-of-stream before the announced length has
/// been delivered is a fatal framing error.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let len = read_length_line(reader).await?;
    if len > MAX_MESSAGE_SIZE {
        return Err(PoolError::Frame(format!(
            "message length {len} exceeds maximum {MAX_MESSAGE_SIZE}"
        )));
    }

    let mut msg = Vec::with_capacity(len);
    let mut chunk = [0u8; PIPE_CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(PIPE_CHUNK_SIZE);
        reader.read_exact(&mut chunk[..want]).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                PoolError::Frame(format!(
                    "EOF after {} of {} message bytes",
                    len - remaining,
                    len
                ))
            } else {
                PoolError::Io(err)
            }
        })?;
        msg.extend_from_slice(&chunk[..want]);
        remaining -= want;
    }
    Ok(msg)
}

/// Read the child's startup handshake, the exact line `ok\n`.
///
/// Anything else (or EOF) fails: the rest of the stream is drained and
/// returned as the error message, on the assumption that a worker that could
/// not boot wrote its complaint to stdout.
pub async fn read_handshake<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line == b"ok\n" {
        return Ok(());
    }
    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest).await;
    line.extend_from_slice(&rest);
    if line.is_empty() {
        return Err(PoolError::Handshake("EOF before handshake".to_string()));
    }
    Err(PoolError::Handshake(
        String::from_utf8_lossy(&line).trim_end().to_string(),
    ))
}

/// Ask the child to shut down cleanly by writing a bare LF (an empty length
/// line) and flushing.
pub async fn write_shutdown<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn read_length_line<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(PoolError::Frame("EOF before length line".to_string()));
    }
    if line.pop() != Some(b'\n') {
        return Err(PoolError::Frame("unterminated length line".to_string()));
    }
    let text = std::str::from_utf8(&line)
        .map_err(|_| PoolError::Frame("length line is not ASCII".to_string()))?;
    text.parse()
        .map_err(|_| PoolError::Frame(format!("bad length prefix {text:?}")))
}
