//! ACP message reader.
//!
//! Decodes newline-delimited JSON-RPC messages from any [`AsyncRead`] using
//! [`FramedRead`] over [`AcpCodec`]. Used for both the editor's stdin and the
//! agent's stdout.
//!
//! Blank lines are skipped. A line that is not valid JSON, or that exceeds
//! the codec's line limit, is a protocol error: the caller stops reading that
//! stream.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::acp::codec::AcpCodec;
use crate::{AppError, Result};

/// Parse one NDJSON line.
///
/// - `Ok(Some(value))`: a JSON document.
/// - `Ok(None)`: the line is empty or whitespace.
///
/// # Errors
///
/// [`AppError::Acp`]`("malformed json: …")` when the line is not valid JSON.
pub fn parse_line(line: &str) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| AppError::Acp(format!("malformed json: {e}")))
}

/// Pull-based reader of JSON-RPC messages.
#[derive(Debug)]
pub struct MessageReader<R> {
    framed: FramedRead<R, AcpCodec>,
    lines_read: u64,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `source` with the default [`AcpCodec`].
    pub fn new(source: R) -> Self {
        Self::with_codec(source, AcpCodec::new())
    }

    /// Wrap `source` with a specific codec.
    pub fn with_codec(source: R, codec: AcpCodec) -> Self {
        Self {
            framed: FramedRead::new(source, codec),
            lines_read: 0,
        }
    }

    /// Number of non-blank lines decoded so far.
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Read the next message; `Ok(None)` on clean EOF.
    ///
    /// Cancel-safe: dropping the future between lines loses nothing, because
    /// partially received bytes stay buffered inside the [`FramedRead`].
    ///
    /// # Errors
    ///
    /// Framing, I/O, and JSON errors from the underlying stream.
    pub async fn next_message(&mut self) -> Result<Option<Value>> {
        loop {
            let Some(line) = self.framed.next().await else {
                return Ok(None);
            };

            if let Some(value) = parse_line(&line?)? {
                self.lines_read += 1;
                return Ok(Some(value));
            }
        }
    }
}
