//! Transactions and committed records
//!
//! The canonical serialization is the JSON of the struct in declaration
//! order; all nodes must agree on it byte for byte because both transaction
//! hashes and vote matching are computed over it. The unsigned form omits
//! the `signature` field entirely.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use stakemesh_crypto::{sha256_hex, verify_digest_hex, KeyPair};

/// A single transfer, staking, or bootstrap transaction.
///
/// `from` and `to` are compressed secp256k1 public keys in hex, except for
/// the literals `"GENESIS"` (bootstrap sender) and `"stake"` (stake
/// deposit target), which are not keys and get special handling in the
/// state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    /// Create an unsigned transaction stamped with the current time.
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: u64, nonce: u64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            nonce,
            timestamp: chrono::Utc::now().timestamp() as u64,
            body: String::new(),
            signature: None,
        }
    }

    /// Canonical JSON, with or without the signature field.
    pub fn canonical_json(&self, include_signature: bool) -> String {
        if include_signature {
            serde_json::to_string(self).expect("transaction serialization should not fail")
        } else {
            let unsigned = Self {
                signature: None,
                ..self.clone()
            };
            serde_json::to_string(&unsigned).expect("transaction serialization should not fail")
        }
    }

    /// SHA-256 hex over the canonical serialization.
    ///
    /// The unsigned hash (`include_signature = false`) identifies a
    /// transaction for vote matching; the signed hash covers the exact
    /// bytes a peer relayed.
    pub fn hash(&self, include_signature: bool) -> String {
        sha256_hex(&self.canonical_json(include_signature))
    }

    /// Sign the unsigned hash with the sender's key.
    pub fn sign(&mut self, keypair: &KeyPair) -> stakemesh_crypto::Result<()> {
        self.signature = Some(keypair.sign_digest_hex(&self.hash(false))?);
        Ok(())
    }

    /// True iff the signature verifies over the unsigned hash under `from`.
    ///
    /// Always false for the `"GENESIS"` literal, which is not a public
    /// key; genesis records bypass this inside the genesis window instead.
    pub fn verify(&self) -> bool {
        match &self.signature {
            Some(signature) => verify_digest_hex(&self.from, &self.hash(false), signature),
            None => false,
        }
    }

    /// Canonical wire form (signature included).
    pub fn serialize(&self) -> String {
        self.canonical_json(true)
    }

    /// Parse a transaction from its wire form.
    pub fn deserialize(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// One committed chain slot: the transaction plus the per-validator vote
/// that committed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRecord {
    pub transaction: Transaction,
    pub validators: BTreeMap<String, bool>,
    #[serde(rename = "validatorsRoot")]
    pub validators_root: String,
}

impl CommittedRecord {
    /// Build a record, hashing the vote map into its root.
    pub fn new(transaction: Transaction, validators: BTreeMap<String, bool>) -> Self {
        let validators_root = validators_root_hex(&validators);
        Self {
            transaction,
            validators,
            validators_root,
        }
    }

    /// A genesis-window record carries no votes.
    pub fn genesis(transaction: Transaction) -> Self {
        Self::new(transaction, BTreeMap::new())
    }
}

/// Hash of a validator-vote map: sorted keys joined by `:`, then `:`, then
/// sorted values joined by `:`.
///
/// Keys and values are sorted independently; the map type keeps keys
/// ordered already.
pub fn validators_root_hex(validators: &BTreeMap<String, bool>) -> String {
    let keys: Vec<&str> = validators.keys().map(String::as_str).collect();
    let mut values: Vec<&str> = validators
        .values()
        .map(|v| if *v { "true" } else { "false" })
        .collect();
    values.sort_unstable();
    sha256_hex(&format!("{}:{}", keys.join(":"), values.join(":")))
}
