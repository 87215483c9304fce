//! Agent Client Protocol (ACP) stream handling.
//!
//! The agent runs as a child process speaking newline-delimited JSON-RPC 2.0
//! over its stdio. This module owns everything between the proxy pumps and
//! the agent's pipes:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: envelope classification and the few fields the proxy rewrites.
//! - `reader`: pull-based message reader over any [`AsyncRead`](tokio::io::AsyncRead).
//! - `writer`: single-line serialise, write, flush.
//! - `spawner`: agent process startup (direct or sandboxed) and stderr relay.
//! - `session`: one agent process plus request correlation and teardown.

pub mod codec;
pub mod message;
pub mod reader;
pub mod session;
pub mod spawner;
pub mod writer;

pub use session::{AcpSession, SessionState};
pub use spawner::{AgentLauncher, AgentProcess, AgentReader, AgentSpawner, AgentWriter, SpawnConfig, SpawnedAgent};
