//! Fathom MCP server.
//!
//! Exposes the semantic file index to AI agents via the Model Context
//! Protocol over stdio.

mod tools;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rmcp::ServiceExt;

use fathom_core::{Config, Engine};

/// Fathom MCP server
#[derive(Parser, Debug)]
#[command(name = "fathom-mcp", version, about)]
struct Args {
    /// Data directory override (defaults to the platform data dir).
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the MCP protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.data_dir {
        Some(dir) => Config::load_from(std::path::Path::new(dir))?,
        None => Config::load()?,
    };

    let engine = Arc::new(Engine::new(config)?);
    tracing::info!("Fathom MCP server starting on stdio");

    let server = tools::FathomServer::new(engine);
    let service = server
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    service.waiting().await?;

    Ok(())
}
