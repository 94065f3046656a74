//! Line-delimited transport for MCP messages.
//!
//! MCP over stdio follows a simple framing:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//!
//! [`LineChannel`] implements that framing over any pair of async byte
//! streams. The bridge uses one per provider process (the child's stdout and
//! stdin) and one for its own stdin/stdout when re-exporting tools.
//!
//! # Cancellation
//!
//! [`LineChannel::read_line`] keeps partially received bytes inside the
//! channel, so a read abandoned by a timeout resumes where it stopped on the
//! next call instead of losing the head of the line.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp::protocol::encode;

type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// A bidirectional, newline-framed message channel.
pub struct LineChannel {
    /// Buffered reader for incoming lines.
    reader: BufReader<BoxedReader>,
    /// Sink for outgoing lines.
    writer: BoxedWriter,
    /// Bytes of a line whose read was interrupted.
    pending: Vec<u8>,
}

impl std::fmt::Debug for LineChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannel")
            .field("pending_bytes", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LineChannel {
    /// Creates a channel reading from `reader` and writing to `writer`.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
            pending: Vec::new(),
        }
    }

    /// Creates a channel over the current process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Reads the next message line.
    ///
    /// Returns `None` once the stream is closed (EOF) and nothing is left
    /// over. The trailing `\n` or `\r\n` is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let bytes_read = self.reader.read_until(b'\n', &mut self.pending).await?;

        if bytes_read == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let raw = std::mem::take(&mut self.pending);
        let mut line = String::from_utf8_lossy(&raw).into_owned();

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }

    /// Serialises `message` and writes it as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        let line = encode(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_raw(&line).await
    }

    /// Writes an already framed line and flushes.
    async fn write_raw(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the writing half, signalling EOF to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails to shut down.
    pub async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
