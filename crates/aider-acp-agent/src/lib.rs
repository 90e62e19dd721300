//! ACP agent that exposes aider over the Agent Client Protocol.
//!
//! Speaks JSON-RPC on stdio toward the client and drives aider processes
//! through `aider-acp-core` on the other side.
//!
//! # Components
//! - `agent`: the `Agent` trait implementation and session event pump
//! - `render`: formatting of classified output into displayable text

mod agent;
mod render;

use std::rc::Rc;

use agent_client_protocol::AgentSideConnection;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::info;

pub use agent::AiderAgent;

/// Model identifier passed to aider when none is configured.
pub const DEFAULT_MODEL: &str = "gemini/gemini-2.5-flash";

/// Runtime configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier forwarded to aider via `--model`.
    pub model: String,
    /// Executable spawned for each session.
    pub program: String,
}

/// Serve the agent over stdio until the client disconnects.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(model = %config.model, program = %config.program, "Starting aider ACP agent");

    let agent = Rc::new(AiderAgent::new(config));
    let stdin = tokio::io::stdin().compat();
    let stdout = tokio::io::stdout().compat_write();

    // The protocol connection is not Send, so everything runs on one
    // thread inside a LocalSet.
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let (connection, io_task) =
                AgentSideConnection::new(agent.clone(), stdout, stdin, |fut| {
                    tokio::task::spawn_local(fut);
                });
            agent.attach_connection(Rc::new(connection));
            io_task
                .await
                .map_err(|e| anyhow::anyhow!("ACP I/O error: {}", e))
        })
        .await?;

    info!("Client disconnected, shutting down");
    Ok(())
}
