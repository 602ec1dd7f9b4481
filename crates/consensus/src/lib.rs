//! Stakemesh Consensus - peer-to-peer agreement on one transaction at a time
//!
//! Architecture:
//! - Every node is WebSocket server and client at once; all sockets feed
//!   one signed-envelope gossip pipeline with flood-fill and dedup
//! - On startup a node syncs its chain from the plurality of its peers
//! - A single consensus slot votes on one candidate transaction; further
//!   submissions queue behind it and a timeout punishes silent validators

pub mod envelope;
pub mod gossip;
pub mod node;
pub mod sync;
pub mod vote;

#[cfg(test)]
mod tests;

pub use envelope::{ChainData, Envelope, MessageKind, VoteData};
pub use node::{Node, NodeBuilder, NodeConfig, NodeStats};

/// How many recently seen message ids are kept for gossip deduplication
pub const GOSSIP_DEDUP_WINDOW: usize = 10;
