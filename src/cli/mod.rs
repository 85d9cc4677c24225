//! Command handlers for the `p2pnode` binary

pub mod commands;

pub use commands::{cmd_chain_genesis, cmd_node_start, genesis_json, parse_peers, CliResult};
