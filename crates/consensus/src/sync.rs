//! Startup chain synchronization
//!
//! A joining node asks every peer for its chain, waits until all but one
//! of the known validators answered, and adopts the snapshot whose Merkle
//! root has plurality, provided it is at least as long as the local chain.
//! Adoption re-derives account state from genesis.

use std::collections::HashMap;
use std::sync::Arc;

use stakemesh_ledger::CommittedRecord;

use crate::envelope::ChainData;
use crate::gossip::short;
use crate::node::NodeInner;

/// Snapshot collection for one sync round.
#[derive(Default)]
pub(crate) struct SyncState {
    /// Set while this node is waiting for `CHAIN` answers.
    pub want_chain: bool,
    /// Answers received so far, keyed by peer public key.
    pub snapshots: HashMap<String, (Vec<CommittedRecord>, String)>,
}

/// Handle one `CHAIN` answer addressed to this node.
pub(crate) fn on_chain_snapshot(inner: &Arc<NodeInner>, peer_key: String, data: ChainData) {
    let mut sync = inner.sync.lock();
    if !sync.want_chain {
        return;
    }

    let records: Vec<CommittedRecord> = match serde_json::from_str(&data.transactions) {
        Ok(records) => records,
        Err(e) => {
            tracing::debug!("dropping malformed chain snapshot from {}: {}", short(&peer_key), e);
            return;
        }
    };
    sync.snapshots.insert(peer_key, (records, data.root));

    let needed = inner.validators.lock().len().saturating_sub(1);
    if sync.snapshots.len() < needed.max(1) {
        return;
    }

    // Tally roots and adopt the plurality; ties break on the root string
    // so every node picks the same winner.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, (_, root)) in sync.snapshots.iter() {
        *counts.entry(root.as_str()).or_default() += 1;
    }
    let Some(winner) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
        .map(|(root, _)| root.to_string())
    else {
        return;
    };

    let records = sync
        .snapshots
        .values()
        .find(|(_, root)| *root == winner)
        .map(|(records, _)| records.clone())
        .expect("winning root always has a snapshot");

    sync.want_chain = false;
    sync.snapshots.clear();
    drop(sync);

    let mut chain = inner.chain.lock();
    if records.len() < chain.len() {
        tracing::warn!(
            local = chain.len(),
            peer = records.len(),
            "ignoring plurality chain shorter than ours"
        );
        return;
    }
    chain.adopt_records(records);
    tracing::info!(
        length = chain.len(),
        root = %chain.root(),
        "adopted peer chain"
    );
}

/// Derive state for a chain provided locally, with no peers to ask.
///
/// A chain whose accounts were never materialized is replayed in full;
/// one that already carries balances only needs its Merkle tree.
pub(crate) fn initialize_local_chain(inner: &Arc<NodeInner>) {
    let mut chain = inner.chain.lock();
    if chain.is_empty() {
        return;
    }
    if chain.accounts.is_empty() {
        chain.replay();
        tracing::info!(length = chain.len(), "replayed local chain");
    } else {
        chain.rebuild_merkle();
        tracing::info!(length = chain.len(), "rebuilt merkle tree over local chain");
    }
}
