//! CLI commands for the node
//!
//! Implements all command handlers for the CLI interface.

use crate::core::{BlockHeader, Network};
use crate::crypto::BlockHash;
use crate::network::{Node, NodeConfig};
use serde::Serialize;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Split a comma-separated peer list, dropping empty entries
pub fn parse_peers(peers: Option<&str>) -> Vec<String> {
    peers
        .map(|p| {
            p.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Run a node until Ctrl-C
pub async fn cmd_node_start(config: NodeConfig) -> CliResult<()> {
    println!(
        "🌐 Starting {} node on port {}...",
        config.network, config.port
    );

    let node = Arc::new(Node::new(config));

    // Handle Ctrl+C
    let signal_node = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("\n📴 Shutting down node...");
        signal_node.shutdown().await;
    });

    node.start().await?;

    let status = node.status().await;
    println!(
        "⛓️  Stopped at height {} (total difficulty {}, head {})",
        status.height, status.total_difficulty, status.head_hash
    );
    Ok(())
}

#[derive(Serialize)]
struct GenesisInfo {
    network: Network,
    hash: BlockHash,
    header: BlockHeader,
}

/// Genesis header of `network` as pretty-printed JSON
pub fn genesis_json(network: Network) -> Result<String, serde_json::Error> {
    let genesis = network.genesis();
    serde_json::to_string_pretty(&GenesisInfo {
        network,
        hash: genesis.hash(),
        header: genesis.header,
    })
}

/// Print the genesis header of `network`
pub fn cmd_chain_genesis(network: Network, json: bool) -> CliResult<()> {
    if json {
        println!("{}", genesis_json(network)?);
        return Ok(());
    }

    let genesis = network.genesis();
    let header = &genesis.header;
    println!("⛓️  Genesis ({})", network);
    println!("   ├─ Hash: {}", genesis.hash());
    println!("   ├─ Timestamp: {}", header.timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!("   ├─ Difficulty: {}", header.difficulty);
    println!("   ├─ Total difficulty: {}", header.total_difficulty);
    println!("   ├─ Nonce: {}", header.nonce);
    println!("   └─ Proof size: {}", header.pow.len());

    Ok(())
}
