//! In-memory account state using DashMap for concurrent access

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Balance, stake, and nonce for one public key.
///
/// Balances are signed: slashing may overdraw a stake, and the genesis
/// window credits accounts that never held funds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: i64,
    pub stake: i64,
    pub nonce: u64,
}

/// Thread-safe account map keyed by public key hex.
///
/// Accounts are created on first credit or debit and never deleted. The
/// store clones cheaply; all clones share the same map.
#[derive(Clone, Default)]
pub struct AccountStore {
    accounts: Arc<DashMap<String, Account>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of an account, if it exists.
    pub fn get_account(&self, pubkey: &str) -> Option<Account> {
        self.accounts.get(pubkey).map(|r| *r.value())
    }

    /// Current stake of a key (0 when the account does not exist).
    pub fn stake_of(&self, pubkey: &str) -> i64 {
        self.accounts.get(pubkey).map(|a| a.stake).unwrap_or(0)
    }

    /// Mutate an account, creating it first if missing.
    pub fn update<F: FnOnce(&mut Account)>(&self, pubkey: &str, f: F) {
        let mut entry = self.accounts.entry(pubkey.to_string()).or_default();
        f(entry.value_mut());
    }

    pub fn account_exists(&self, pubkey: &str) -> bool {
        self.accounts.contains_key(pubkey)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Drop every account. Sync adopts a peer chain by clearing and
    /// replaying from genesis.
    pub fn clear(&self) {
        self.accounts.clear();
    }

    /// Copy of the whole map, for snapshots and state comparison.
    pub fn snapshot(&self) -> HashMap<String, Account> {
        self.accounts
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_creates_missing_accounts() {
        let store = AccountStore::new();
        assert!(!store.account_exists("alice"));

        store.update("alice", |a| a.balance += 500);

        let account = store.get_account("alice").unwrap();
        assert_eq!(account.balance, 500);
        assert_eq!(account.stake, 0);
        assert_eq!(account.nonce, 0);
    }

    #[test]
    fn stake_of_missing_account_is_zero() {
        let store = AccountStore::new();
        assert_eq!(store.stake_of("nobody"), 0);

        store.update("bob", |a| a.stake = 42);
        assert_eq!(store.stake_of("bob"), 42);
    }

    #[test]
    fn clear_resets_everything() {
        let store = AccountStore::new();
        store.update("alice", |a| a.balance = 1);
        store.update("bob", |a| a.balance = 2);
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = AccountStore::new();
        let alias = store.clone();
        alias.update("alice", |a| a.balance = 7);
        assert_eq!(store.get_account("alice").unwrap().balance, 7);
    }
}
