//! The two message pumps.
//!
//! Each pump reads one message at a time, rewrites it through the
//! [`ProxyLink`], and writes it to the other side. Reads are raced against
//! the cancellation token; writes are not, so a message that has started to
//! go out is always finished.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::message;
use crate::acp::reader::MessageReader;
use crate::acp::writer::write_json_line;
use crate::proxy::link::{InboundRoute, ProxyLink};
use crate::Result;

/// How a pump stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The source stream reached EOF.
    Eof,
    /// The cancellation token fired between messages.
    Cancelled,
}

/// Editor → agent.
///
/// # Errors
///
/// Malformed input from the editor, or a failed write to the agent.
pub async fn pump_outbound<R>(
    link: &ProxyLink,
    editor: &mut MessageReader<R>,
    cancel: &CancellationToken,
) -> Result<PumpEnd>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
            next = editor.next_message() => next,
        };

        let Some(mut message) = next.map_err(|err| {
            warn!(error = %err, "proxy outbound: editor stream failed");
            err
        })?
        else {
            info!(messages = editor.lines_read(), "proxy outbound: editor closed input");
            return Ok(PumpEnd::Eof);
        };

        link.prepare_outbound(&mut message);
        debug!(
            method = message::method(&message).unwrap_or(""),
            id = message::message_id_key(&message).unwrap_or_default(),
            "proxy outbound: forwarding"
        );
        link.session().write_to_agent(&message).await?;
    }
}

/// Agent → editor. The only writer of the editor's stdout.
///
/// # Errors
///
/// Malformed output from the agent, or a failed write to the editor.
pub async fn pump_inbound<R, W>(
    link: &ProxyLink,
    agent: &mut MessageReader<R>,
    editor: &mut W,
    cancel: &CancellationToken,
) -> Result<PumpEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
            next = agent.next_message() => next,
        };

        let Some(message) = next.map_err(|err| {
            warn!(error = %err, "proxy inbound: agent stream failed");
            err
        })?
        else {
            info!(messages = agent.lines_read(), "proxy inbound: agent closed output");
            return Ok(PumpEnd::Eof);
        };

        if let InboundRoute::Forward(message) = link.route_inbound(message) {
            forward(editor, &message).await?;
        }
    }
}

async fn forward<W>(editor: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    debug!(
        method = message::method(message).unwrap_or(""),
        id = message::message_id_key(message).unwrap_or_default(),
        "proxy inbound: forwarding"
    );
    write_json_line(editor, message).await
}
