//! Incremental Merkle commitment over committed transactions
//!
//! Leaves are the unsigned transaction hashes in commit order. The tree is
//! a commitment, not a proof system: only the root crosses the wire, so
//! the hashing rule must match on every node. Hash inputs are the two
//! child hex strings concatenated, not their decoded bytes.

use stakemesh_crypto::sha256_hex;

/// Incremental binary hash tree over hex-encoded leaves.
#[derive(Debug, Clone, Default)]
pub struct TransactionMerkle {
    /// levels[0] holds every leaf; upper levels memoize full pairs as they
    /// complete. Partial pairs are only resolved by `root()`.
    levels: Vec<Vec<String>>,
}

impl TransactionMerkle {
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Number of leaves committed so far.
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a leaf and promote completed pairs upward.
    pub fn add(&mut self, leaf_hex: String) {
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        self.levels[0].push(leaf_hex);

        let mut level = 0;
        while self.levels[level].len() % 2 == 0 {
            let nodes = &self.levels[level];
            let parent = sha256_hex(&format!(
                "{}{}",
                nodes[nodes.len() - 2],
                nodes[nodes.len() - 1]
            ));
            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }
            self.levels[level + 1].push(parent);
            level += 1;
        }
    }

    /// Fold the leaves pairwise until one node remains, duplicating the
    /// last node of an odd level. The empty tree commits to sha256("0").
    pub fn root(&self) -> String {
        let Some(leaves) = self.levels.first() else {
            return sha256_hex("0");
        };
        if leaves.is_empty() {
            return sha256_hex("0");
        }

        let mut nodes = leaves.clone();
        while nodes.len() > 1 {
            let mut next = Vec::with_capacity(nodes.len() / 2 + 1);
            for pair in nodes.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(sha256_hex(&format!("{}{}", pair[0], right)));
            }
            nodes = next;
        }
        nodes.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: usize) -> String {
        sha256_hex(&n.to_string())
    }

    /// Reference fold: pairwise, duplicate last if odd.
    fn reference_root(leaves: &[String]) -> String {
        if leaves.is_empty() {
            return sha256_hex("0");
        }
        let mut nodes = leaves.to_vec();
        while nodes.len() > 1 {
            let mut next = Vec::new();
            for pair in nodes.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(sha256_hex(&format!("{}{}", pair[0], right)));
            }
            nodes = next;
        }
        nodes.remove(0)
    }

    #[test]
    fn empty_tree_root() {
        assert_eq!(TransactionMerkle::new().root(), sha256_hex("0"));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let mut tree = TransactionMerkle::new();
        tree.add(leaf(1));
        assert_eq!(tree.root(), leaf(1));
    }

    #[test]
    fn two_leaves_hash_as_concatenated_hex() {
        let mut tree = TransactionMerkle::new();
        tree.add(leaf(1));
        tree.add(leaf(2));
        assert_eq!(tree.root(), sha256_hex(&format!("{}{}", leaf(1), leaf(2))));
    }

    #[test]
    fn roots_match_reference_for_all_small_sizes() {
        for n in 0..=17 {
            let leaves: Vec<String> = (0..n).map(leaf).collect();
            let mut tree = TransactionMerkle::new();
            for l in &leaves {
                tree.add(l.clone());
            }
            assert_eq!(tree.root(), reference_root(&leaves), "size {}", n);
        }
    }

    #[test]
    fn incremental_equals_batch() {
        let mut incremental = TransactionMerkle::new();
        for n in 0..9 {
            incremental.add(leaf(n));
        }

        let mut batch = TransactionMerkle::new();
        for n in 0..9 {
            batch.add(leaf(n));
        }
        assert_eq!(incremental.root(), batch.root());
        assert_eq!(incremental.len(), 9);
    }
}
