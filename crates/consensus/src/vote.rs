//! The single-slot vote state machine
//!
//! At most one candidate transaction is live at a time; everything else
//! waits in the pending queue. A slot closes only through a commit
//! decision - the timeout rebroadcasts and punishes silent validators but
//! never abandons the candidate.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;
use serde_json::Value;

use stakemesh_ledger::{CommittedRecord, Transaction, MAX_VOTE_TIME_MS, MIN_STAKE};

use crate::envelope::{MessageKind, VoteData};
use crate::gossip::{self, short};
use crate::node::NodeInner;

/// One recorded vote on the current candidate.
#[derive(Debug, Clone)]
pub(crate) struct PeerVote {
    pub valid: bool,
    pub root: String,
    pub transaction: String,
}

/// The consensus slot.
#[derive(Default)]
pub(crate) struct VoteSlot {
    /// The live candidate, if a vote is in progress.
    pub vote: Option<Transaction>,
    /// Votes received this round, keyed by validator public key.
    pub consensus: HashMap<String, PeerVote>,
    /// Submissions that arrived while a vote was live, in arrival order.
    pub pending: VecDeque<Transaction>,
    /// Bumped whenever the slot turns over; a timeout firing against a
    /// stale generation is a cancelled timeout.
    pub generation: u64,
}

/// A locally created transaction enters consensus.
///
/// The `NEW_TRANSACTION` flood and the local slot change happen under one
/// slot lock, so no peer vote can slip in between them and find the slot
/// still idle.
pub(crate) fn submit_local(inner: &Arc<NodeInner>, transaction: Transaction) {
    let mut slot = inner.slot.lock();
    gossip::broadcast(
        inner,
        MessageKind::NewTransaction,
        Some(Value::String(transaction.serialize())),
        None,
    );
    open_or_enqueue(inner, &mut slot, transaction);
}

/// A peer's `NEW_TRANSACTION` arrived; the gossip layer already relayed it.
pub(crate) fn on_new_transaction(inner: &Arc<NodeInner>, transaction: Transaction) {
    let mut slot = inner.slot.lock();
    open_or_enqueue(inner, &mut slot, transaction);
}

fn open_or_enqueue(
    inner: &Arc<NodeInner>,
    slot: &mut MutexGuard<'_, VoteSlot>,
    transaction: Transaction,
) {
    if slot.vote.is_some() {
        tracing::debug!(
            pending = slot.pending.len() + 1,
            "vote in progress, queueing transaction"
        );
        slot.pending.push_back(transaction);
        return;
    }
    open_slot(inner, slot, transaction);
}

/// Open a vote round for a candidate and announce our own vote.
fn open_slot(inner: &Arc<NodeInner>, slot: &mut MutexGuard<'_, VoteSlot>, candidate: Transaction) {
    slot.consensus.clear();
    slot.generation += 1;
    slot.vote = Some(candidate.clone());

    tracing::info!(hash = %candidate.hash(false), "opening vote slot");
    broadcast_own_vote(inner, slot, &candidate);
    arm_timeout(inner, slot.generation);

    // An isolated node tallies immediately with its own vote; a meshed
    // node waits for peers even while the validator set is still forming.
    if inner.sockets.lock().is_empty() {
        maybe_commit(inner, slot);
    }
}

fn broadcast_own_vote(
    inner: &Arc<NodeInner>,
    slot: &MutexGuard<'_, VoteSlot>,
    candidate: &Transaction,
) {
    let (valid, root) = {
        let chain = inner.chain.lock();
        let (valid, reasons) = chain.transaction_valid(candidate, true, slot.pending.len());
        if !valid {
            tracing::info!(?reasons, "voting invalid on candidate");
        }
        (valid, chain.root())
    };
    let data = serde_json::to_value(VoteData {
        transaction: candidate.serialize(),
        valid,
        root,
    })
    .expect("vote payload serialization should not fail");
    gossip::broadcast(inner, MessageKind::Transaction, Some(data), None);
}

/// A peer's `TRANSACTION` vote arrived.
pub(crate) fn on_peer_vote(inner: &Arc<NodeInner>, sender: String, data: VoteData) {
    let mut slot = inner.slot.lock();
    let Some(candidate) = slot.vote.clone() else {
        // Late vote for a slot we already decided.
        return;
    };

    {
        let chain = inner.chain.lock();
        if data.root != chain.root() {
            tracing::debug!(
                peer = short(&sender),
                "dropping vote with divergent merkle root"
            );
            return;
        }
        if chain.accounts.stake_of(&sender) < MIN_STAKE {
            tracing::debug!(peer = short(&sender), "dropping vote from under-staked peer");
            return;
        }
    }

    let Ok(tx) = Transaction::deserialize(&data.transaction) else {
        tracing::debug!(peer = short(&sender), "dropping vote with malformed transaction");
        return;
    };
    if tx.hash(false) != candidate.hash(false) {
        tracing::debug!(peer = short(&sender), "dropping vote for a different candidate");
        return;
    }

    slot.consensus.insert(
        sender,
        PeerVote {
            valid: data.valid,
            root: data.root,
            transaction: data.transaction,
        },
    );

    maybe_commit(inner, &mut slot);
}

/// Tally once every live validator has voted.
fn maybe_commit(inner: &Arc<NodeInner>, slot: &mut MutexGuard<'_, VoteSlot>) {
    let Some(candidate) = slot.vote.clone() else {
        return;
    };
    let validator_count = inner.validators.lock().len();
    if slot.consensus.len() < validator_count {
        return;
    }

    let mut chain = inner.chain.lock();

    // Our own vote joins the tally last.
    let (self_valid, _) = chain.transaction_valid(&candidate, false, 0);
    slot.consensus.insert(
        inner.public_key.clone(),
        PeerVote {
            valid: self_valid,
            root: chain.root(),
            transaction: candidate.serialize(),
        },
    );

    let true_count = slot.consensus.values().filter(|v| v.valid).count();
    let false_count = slot.consensus.len() - true_count;

    if true_count > false_count {
        let validators: BTreeMap<String, bool> = slot
            .consensus
            .iter()
            .map(|(key, vote)| (key.clone(), vote.valid))
            .collect();
        chain.apply_record(CommittedRecord::new(candidate.clone(), validators));
        tracing::info!(
            hash = %candidate.hash(false),
            yes = true_count,
            no = false_count,
            length = chain.len(),
            "transaction committed"
        );
    } else {
        tracing::info!(
            hash = %candidate.hash(false),
            yes = true_count,
            no = false_count,
            "transaction rejected"
        );
    }
    drop(chain);

    // Slot turnover; the generation bump cancels the armed timeout.
    slot.vote = None;
    slot.consensus.clear();
    slot.generation += 1;

    if let Some(next) = slot.pending.pop_front() {
        open_slot(inner, slot, next);
    }
}

fn arm_timeout(inner: &Arc<NodeInner>, generation: u64) {
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(MAX_VOTE_TIME_MS)).await;
        on_vote_timeout(&inner, generation);
    });
}

/// The vote round ran out of time.
///
/// Validators that stayed silent lose their socket, the tally clears, and
/// the same candidate goes out again.
pub(crate) fn on_vote_timeout(inner: &Arc<NodeInner>, generation: u64) {
    let mut slot = inner.slot.lock();
    if slot.generation != generation {
        return;
    }
    let Some(candidate) = slot.vote.clone() else {
        return;
    };

    let silent: HashSet<String> = {
        let validators = inner.validators.lock();
        validators
            .iter()
            .filter(|v| !slot.consensus.contains_key(*v))
            .cloned()
            .collect()
    };
    if !silent.is_empty() {
        tracing::warn!(count = silent.len(), "vote timed out with silent validators");
        gossip::close_sockets_with_identity(inner, &silent);
    }

    slot.consensus.clear();
    broadcast_own_vote(inner, &slot, &candidate);
    arm_timeout(inner, generation);
}
