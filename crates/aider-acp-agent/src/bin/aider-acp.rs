//! aider-acp - ACP stdio agent backed by aider
//!
//! This binary is intended to be launched by an ACP client such as Zed.
//! It speaks the Agent Client Protocol on stdio and drives an aider
//! process per session.

use anyhow::Result;
use clap::Parser;

use aider_acp_agent::{run, AgentConfig, DEFAULT_MODEL};

#[derive(Parser, Debug)]
#[command(name = "aider-acp")]
#[command(about = "Agent Client Protocol bridge for the aider coding assistant")]
#[command(version)]
struct Args {
    /// Model identifier passed to aider
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Aider executable to spawn
    #[arg(long, default_value = "aider")]
    aider_bin: String,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("AIDER_ACP_LOG") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries the protocol stream, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(AgentConfig {
        model: args.model,
        program: args.aider_bin,
    })
    .await
}
