//! Two-node loopback test over real WebSocket connections
//!
//! Boots two validators on localhost, lets the second sync its chain and
//! both discover each other as validators, then commits one transfer
//! through the full gossip-and-vote path and checks both replicas agree.

use std::time::Duration;

use stakemesh_crypto::KeyPair;
use stakemesh_ledger::{Chain, CommittedRecord, Transaction, FEE, GENESIS, STAKE_TARGET};

use crate::node::{Node, NodeBuilder};

const PORT_A: u16 = 47661;
const PORT_B: u16 = 47662;

/// Genesis window: balances for both validators, then their stakes.
fn genesis_records(a: &KeyPair, b: &KeyPair) -> Vec<CommittedRecord> {
    let allocation = |to: &str| {
        let mut tx = Transaction::new(GENESIS, to, 10_000_000_000, 0);
        tx.body = GENESIS.to_string();
        CommittedRecord::genesis(tx)
    };
    let stake = |keypair: &KeyPair| {
        let mut tx = Transaction::new(keypair.public_key_hex(), STAKE_TARGET, 2_000_000_000, 0);
        tx.body = GENESIS.to_string();
        CommittedRecord::genesis(tx)
    };
    vec![
        allocation(&a.public_key_hex()),
        allocation(&b.public_key_hex()),
        stake(a),
        stake(b),
    ]
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn two_nodes_sync_and_commit_a_transfer() {
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let records = genesis_records(&a, &b);

    let node_a: Node = NodeBuilder::new()
        .port(PORT_A)
        .private_key(&a.secret_hex())
        .chain(Chain::with_records(records.clone()))
        .exit_on_disconnect(false)
        .build()
        .unwrap();
    node_a.start().await.unwrap();

    // A had no peers: it replays its local chain and stands by.
    assert_eq!(node_a.chain_len(), records.len());
    let genesis_root = node_a.chain_root();

    let node_b: Node = NodeBuilder::new()
        .port(PORT_B)
        .peers(vec![format!("ws://127.0.0.1:{PORT_A}")])
        .private_key(&b.secret_hex())
        .chain(Chain::with_records(records.clone()))
        .exit_on_disconnect(false)
        .build()
        .unwrap();
    node_b.start().await.unwrap();

    // B adopts A's snapshot and both sides admit each other as validators.
    wait_until("chain sync", || node_b.chain_root() == genesis_root).await;
    wait_until("validator discovery", || {
        node_a.stats().validators == 1 && node_b.stats().validators == 1
    })
    .await;

    // One transfer through the full vote round.
    let mut transfer = Transaction::new(b.public_key_hex(), "carol", 1_000, 0);
    transfer.sign(&b).unwrap();
    node_b.submit(transfer);

    wait_until("commit on both replicas", || {
        node_a.chain_len() == records.len() + 1 && node_b.chain_len() == records.len() + 1
    })
    .await;

    assert_eq!(node_a.chain_root(), node_b.chain_root());
    assert_eq!(node_a.account("carol").unwrap().balance, 1_000 - FEE);
    assert_eq!(
        node_a.account(&b.public_key_hex()),
        node_b.account(&b.public_key_hex())
    );

    // Genesis left both at 10^10 - fee - 2*10^9; the sender paid 1000 and
    // both voting validators earned floor(fee / 2) + 1 = 51.
    let reward = FEE / 2 + 1;
    let funded = 10_000_000_000 - FEE - 2_000_000_000;
    let a_account = node_a.account(&a.public_key_hex()).unwrap();
    let b_account = node_b.account(&b.public_key_hex()).unwrap();
    assert_eq!(a_account.balance, funded + reward);
    assert_eq!(b_account.balance, funded - 1_000 + reward);
    assert_eq!(b_account.nonce, 1);
}
