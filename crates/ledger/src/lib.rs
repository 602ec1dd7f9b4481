//! Stakemesh Ledger - replicated transaction history and account state
//!
//! This crate provides the deterministic half of the protocol:
//! - Canonically serialized, secp256k1-signed transactions
//! - The incremental Merkle commitment over committed transactions
//! - The account-state transition applied on replay and on commit
//! - The chain container tying the three together

pub mod account_store;
pub mod chain;
pub mod merkle;
pub mod transaction;

pub use account_store::{Account, AccountStore};
pub use chain::Chain;
pub use merkle::TransactionMerkle;
pub use transaction::{validators_root_hex, CommittedRecord, Transaction};

/// Stake required to be counted as a validator
pub const MIN_STAKE: i64 = 1_000_000_000;

/// Flat fee taken from every transfer, split across voting validators
pub const FEE: i64 = 100;

/// Stake slashed from a validator that voted against a committed transaction
pub const FINE: i64 = 10_000;

/// Tolerated clock skew for transaction timestamps, in seconds
pub const TIMESTAMP_RANGE: u64 = 60;

/// Upper bound on one vote round before the timeout fires, in milliseconds
pub const MAX_VOTE_TIME_MS: u64 = 10_000;

/// Number of leading chain records exempt from signature checks
pub const GENESIS_WINDOW: usize = 6;

/// Sender and body literal marking bootstrap allocations
pub const GENESIS: &str = "GENESIS";

/// Recipient literal that routes a transfer into the sender's stake
pub const STAKE_TARGET: &str = "stake";
