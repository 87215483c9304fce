//! ACP message writer.
//!
//! Serialises a JSON value to one compact line, appends `\n`, writes it, and
//! flushes, producing NDJSON as required by the ACP stdio transport. Callers
//! that share a sink between tasks must hold a lock across the whole call so
//! that messages never interleave.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{AppError, Result};

/// Write `message` as a single NDJSON line and flush.
///
/// # Errors
///
/// - [`AppError::Acp`]`("failed to serialise outbound message: …")` if
///   serialisation fails (should not occur for `Value`).
/// - [`AppError::Io`] (or a more specific I/O mapping) if the write or
///   flush fails, e.g. because the peer has exited.
pub async fn write_json_line<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| AppError::Acp(format!("failed to serialise outbound message: {e}")))?;

    // NDJSON: append the newline delimiter.
    bytes.push(b'\n');

    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
