//! NDJSON codec for ACP streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized message from either peer cannot grow the read
//! buffer without bound.
//!
//! Both the editor's stdin and the agent's stdout are framed with
//! [`AcpCodec`] through [`tokio_util::codec::FramedRead`]. Each
//! newline-terminated (`\n`) UTF-8 line is one complete JSON-RPC message.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the ACP codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec for ACP stdio streams.
///
/// Lines longer than the codec's limit (default [`MAX_LINE_BYTES`]) return
/// [`AppError::Acp`]`("line too long: …")`. I/O errors are mapped to
/// [`AppError::Io`].
#[derive(Debug)]
pub struct AcpCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl AcpCodec {
    /// Create a new `AcpCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Longest accepted line, in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Acp(format!("line too long: exceeded {} bytes", self.max_length))
            }
            LinesCodecError::Io(io_err) => AppError::from(io_err),
        }
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode(src).map_err(|e| self.map_error(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode_eof(src).map_err(|e| self.map_error(e))
    }
}
