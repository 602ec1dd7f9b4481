//! Node orchestrator
//!
//! Wires the gossip mesh, chain sync, and the vote slot together around
//! one owned chain. All subsystem state lives behind short-lived locks in
//! `NodeInner`; handlers never hold a lock across an await point.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use stakemesh_crypto::KeyPair;
use stakemesh_ledger::{Account, AccountStore, Chain, Transaction};

use crate::envelope::MessageKind;
use crate::gossip::{self, PeerSocket};
use crate::sync::{self, SyncState};
use crate::vote::{self, VoteSlot};

/// Everything the launcher supplies to construct a node.
pub struct NodeConfig {
    /// Initial chain; may be empty or pre-loaded with records.
    pub chain: Chain,
    /// Port to listen on for peer WebSocket connections.
    pub port: u16,
    /// Seed peers, as `ws://host:port` URLs.
    pub peers: Vec<String>,
    /// Hex-encoded secp256k1 secret key identifying this node.
    pub private_key: String,
    /// Exit the process when no peer socket remains after the grace
    /// window, letting a supervisor restart the node.
    pub exit_on_disconnect: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain: Chain::new(),
            port: 3000,
            peers: Vec::new(),
            private_key: String::new(),
            exit_on_disconnect: true,
        }
    }
}

/// Shared node state.
///
/// Lock order, where two must nest: slot, sync, validators, chain,
/// sockets, seen_ids. `accounts` is lock-free and never nests.
pub(crate) struct NodeInner {
    pub keypair: KeyPair,
    pub public_key: String,
    pub port: u16,
    pub peers: Vec<String>,
    pub exit_on_disconnect: bool,

    /// Handle onto the chain's account map, for lock-free stake lookups.
    pub accounts: AccountStore,
    pub chain: Mutex<Chain>,

    pub sockets: Mutex<HashMap<u64, PeerSocket>>,
    pub next_socket_id: AtomicU64,

    /// Live validator set; emptied whenever any socket closes.
    pub validators: Mutex<HashSet<String>>,
    /// Recently seen envelope ids, oldest first.
    pub seen_ids: Mutex<VecDeque<String>>,

    pub slot: Mutex<VoteSlot>,
    pub sync: Mutex<SyncState>,
}

/// A stake-weighted consensus validator node.
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let keypair = KeyPair::from_hex(&config.private_key)?;
        let public_key = keypair.public_key_hex();
        let accounts = config.chain.accounts.clone();

        Ok(Self {
            inner: Arc::new(NodeInner {
                keypair,
                public_key,
                port: config.port,
                peers: config.peers,
                exit_on_disconnect: config.exit_on_disconnect,
                accounts,
                chain: Mutex::new(config.chain),
                sockets: Mutex::new(HashMap::new()),
                next_socket_id: AtomicU64::new(1),
                validators: Mutex::new(HashSet::new()),
                seen_ids: Mutex::new(VecDeque::new()),
                slot: Mutex::new(VoteSlot::default()),
                sync: Mutex::new(SyncState::default()),
            }),
        })
    }

    /// This node's compressed public key in hex.
    pub fn public_key(&self) -> &str {
        &self.inner.public_key
    }

    /// Start listening, dial the seed peers, and kick off chain sync.
    pub async fn start(&self) -> anyhow::Result<()> {
        gossip::run_listener(self.inner.clone()).await?;

        let connected = gossip::dial_peers(&self.inner).await;
        if connected > 0 {
            self.inner.sync.lock().want_chain = true;
            gossip::broadcast(&self.inner, MessageKind::GetChain, None, None);
            gossip::broadcast(
                &self.inner,
                MessageKind::Validator,
                Some(Value::String(self.inner.public_key.clone())),
                None,
            );
            gossip::schedule_exit_watchdog(&self.inner, Duration::from_secs(10));
        } else {
            sync::initialize_local_chain(&self.inner);
        }

        tracing::info!(
            port = self.inner.port,
            peers = connected,
            "node started"
        );
        Ok(())
    }

    /// Inject a locally created transaction into consensus.
    ///
    /// The transaction is flooded to peers as `NEW_TRANSACTION` and either
    /// opens the next vote slot or queues behind the live one.
    pub fn submit(&self, transaction: Transaction) {
        vote::submit_local(&self.inner, transaction);
    }

    /// Point-in-time counters for logging and monitoring.
    pub fn stats(&self) -> NodeStats {
        let slot = self.inner.slot.lock();
        NodeStats {
            sockets: self.inner.sockets.lock().len(),
            validators: self.inner.validators.lock().len(),
            chain_length: self.inner.chain.lock().len(),
            vote_open: slot.vote.is_some(),
            pending: slot.pending.len(),
        }
    }

    /// Current Merkle root over the committed chain.
    pub fn chain_root(&self) -> String {
        self.inner.chain.lock().root()
    }

    pub fn chain_len(&self) -> usize {
        self.inner.chain.lock().len()
    }

    /// Copy of one account's state, if it exists.
    pub fn account(&self, pubkey: &str) -> Option<Account> {
        self.inner.accounts.get_account(pubkey)
    }
}

/// Stats about a running node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub sockets: usize,
    pub validators: usize,
    pub chain_length: usize,
    pub vote_open: bool,
    pub pending: usize,
}

/// Builder for [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn peers(mut self, peers: Vec<String>) -> Self {
        self.config.peers = peers;
        self
    }

    pub fn private_key(mut self, key: &str) -> Self {
        self.config.private_key = key.to_string();
        self
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.config.chain = chain;
        self
    }

    pub fn exit_on_disconnect(mut self, exit: bool) -> Self {
        self.config.exit_on_disconnect = exit;
        self
    }

    pub fn build(self) -> anyhow::Result<Node> {
        Node::new(self.config)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
