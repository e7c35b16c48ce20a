#![forbid(unsafe_code)]
//! Stockchain node: ledger, peer fan-out and REST API in one process

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stockchain::api::run_api_server;
use stockchain::config::load_config;
use stockchain::node::Node;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to serve on; also the default node id
    #[arg(short, long)]
    port: Option<u16>,
    /// Path to config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Node id, overriding the config file
    #[arg(long)]
    node_id: Option<String>,
    /// Extra peer to add at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(id) = cli.node_id {
        config.node.id = Some(id);
    }
    config.network.bootstrap_peers.extend(cli.peers);

    let node = Arc::new(Node::init(&config)?);
    if node.wallet().await.is_none() {
        tracing::warn!("no wallet found; POST /wallet to create one before transacting or mining");
    }

    run_api_server(node, &config.network.host, config.network.port).await
}
