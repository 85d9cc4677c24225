//! p2pnode CLI Application
//!
//! Runs a peer-to-peer chain node or inspects network parameters.

use clap::{Parser, Subcommand};
use p2p_chain::cli;
use p2p_chain::core::Network;
use p2p_chain::network::{NodeConfig, DEFAULT_PORT, MAX_PEERS};

#[derive(Parser)]
#[command(name = "p2pnode")]
#[command(version)]
#[command(about = "Peer-to-peer chain node with header-first sync", long_about = None)]
struct Cli {
    /// Network to join (mainnet, testnet1, testnet2)
    #[arg(short, long, default_value = "mainnet")]
    network: Network,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// P2P node operations
    Node {
        #[command(subcommand)]
        action: NodeCommands,
    },

    /// Display chain parameters
    Chain {
        #[command(subcommand)]
        action: ChainCommands,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Start the P2P node
    Start {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Initial peers to connect to (comma-separated)
        #[arg(long)]
        peers: Option<String>,

        /// Maximum number of connected peers
        #[arg(long, default_value_t = MAX_PEERS)]
        max_peers: usize,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Show the genesis header
    Genesis {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Node {
            action:
                NodeCommands::Start {
                    port,
                    peers,
                    max_peers,
                },
        } => {
            let config = NodeConfig {
                network: cli.network,
                port,
                bootstrap_peers: cli::parse_peers(peers.as_deref()),
                max_peers,
                ..Default::default()
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_node_start(config))?;
        }

        Commands::Chain {
            action: ChainCommands::Genesis { json },
        } => {
            cli::cmd_chain_genesis(cli.network, json)?;
        }
    }

    Ok(())
}
