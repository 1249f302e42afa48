#![warn(missing_docs)]

//! TsVault data node

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tsvault_dnode::{
    Dnode, DnodeConfig, FsRepoEngine, LocalWorkerPool, LogStatusSink, RpcResponse, Transport,
};

#[derive(Debug, Parser)]
#[command(name = "tsv-dnode", about = "TsVault data node")]
struct Args {
    /// Path to a .toml or .json config file
    #[arg(long, env = "TSV_DNODE_CONFIG", default_value = "/etc/tsvault/dnode.toml")]
    config: PathBuf,

    /// Overrides the data directory from the config file
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Replies are only logged until the controller link is wired in.
struct LogTransport;

impl Transport for LogTransport {
    fn send_response(&self, rsp: RpcResponse) {
        tracing::debug!(handle = ?rsp.handle, code = rsp.code, "management reply");
    }

    fn free_cont(&self, _cont: Bytes) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("TsVault data node starting...");

    let args = Args::parse();
    let mut config = if args.config.exists() {
        DnodeConfig::from_file(&args.config)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", args.config.display());
        DnodeConfig::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let dnode = Dnode::init(
        config,
        Arc::new(FsRepoEngine::new()),
        Arc::new(LocalWorkerPool::new()),
        Arc::new(LogTransport),
        Arc::new(LogStatusSink),
    )?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    dnode.cleanup().await;

    Ok(())
}
