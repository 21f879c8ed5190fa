//! Merkle tree over serialized transactions.
//!
//! Rows are stored bottom-up: `rows[0]` holds the leaf hashes and the last
//! row is the single root. Reducing a row pairs adjacent hashes; an odd
//! trailing element is promoted to the next row unchanged:
//!
//! ```text
//!             ROOT=H(H+E)
//!             /        \
//!       H=H(F+G)        E
//!       /      \         \
//! F=H(A+B)    G=H(C+D)    E
//! ```
//!
//! Leaves stay serialized; they are parsed into [`Transaction`]s only when
//! a lookup needs them, and the parse result is cached for the lifetime of
//! the tree.

use crate::canonical;
use crate::crypto::sha256_hex;
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct TreeWire {
    leaves: Vec<String>,
    rows: Vec<Vec<String>>,
    root_hash: String,
}

#[derive(Debug)]
pub struct MerkleTree {
    leaves: Vec<String>,
    rows: Vec<Vec<String>>,
    root_hash: String,
    txns: OnceCell<Vec<Transaction>>,
}

/// Comparing the root hash alone would do; the leaf count check guards the
/// degenerate case of trees built from hash-colliding serializations.
impl PartialEq for MerkleTree {
    fn eq(&self, other: &Self) -> bool {
        self.leaves.len() == other.leaves.len() && self.root_hash == other.root_hash
    }
}

impl MerkleTree {
    /// Build a tree from an ordered list of serialized transactions.
    pub fn from_leaves(leaves: Vec<String>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(ChainError::InvalidInput(
                "Cannot build a merkle tree with no leaves".to_string(),
            ));
        }

        let mut rows = vec![leaves.iter().map(|leaf| sha256_hex(leaf)).collect::<Vec<_>>()];
        while rows[rows.len() - 1].len() > 1 {
            let next = reduce_row(&rows[rows.len() - 1]);
            rows.push(next);
        }
        let root_hash = rows[rows.len() - 1][0].clone();

        Ok(MerkleTree {
            leaves,
            rows,
            root_hash,
            txns: OnceCell::new(),
        })
    }

    /// Serialize each transaction and build a tree over the results.
    pub fn from_transactions(txns: &[Transaction]) -> Result<Self> {
        let leaves = txns
            .iter()
            .map(|txn| txn.serialize())
            .collect::<Result<Vec<_>>>()?;
        Self::from_leaves(leaves)
    }

    /// Restore a tree from its serialized form without rebuilding rows.
    pub fn from_json(data: &str) -> Result<Self> {
        let wire: TreeWire = serde_json::from_str(data)
            .map_err(|e| ChainError::MalformedPayload(format!("Invalid merkle tree: {}", e)))?;
        Ok(MerkleTree {
            leaves: wire.leaves,
            rows: wire.rows,
            root_hash: wire.root_hash,
            txns: OnceCell::new(),
        })
    }

    pub fn serialize(&self) -> Result<String> {
        canonical::to_string(&TreeWire {
            leaves: self.leaves.clone(),
            rows: self.rows.clone(),
            root_hash: self.root_hash.clone(),
        })
    }

    /// Rebuild the row structure from the stored leaves and check that it
    /// reproduces the stored root. Catches tampered or truncated trees that
    /// arrived through [`from_json`].
    pub fn recompute_and_verify(&self) -> Result<bool> {
        let rebuilt = Self::from_leaves(self.leaves.clone())?;
        Ok(rebuilt.root_hash == self.root_hash && rebuilt.rows == self.rows)
    }

    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    fn deserialized(&self) -> Result<&[Transaction]> {
        let txns = self.txns.get_or_try_init(|| {
            self.leaves
                .iter()
                .map(|leaf| Transaction::from_json(leaf))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(txns)
    }

    /// The i-th transaction of the tree, parsed on first access.
    pub fn txn_at(&self, index: usize) -> Result<&Transaction> {
        self.deserialized()?.get(index).ok_or_else(|| {
            ChainError::InvalidInput(format!(
                "Transaction index {} out of range ({} leaves)",
                index,
                self.leaves.len()
            ))
        })
    }

    /// All transactions of the tree, in leaf order.
    pub fn txns(&self) -> Result<&[Transaction]> {
        self.deserialized()
    }

    /// The serialized leaf whose transaction carries `signature`, if any.
    pub fn find_txn_by_sig(&self, signature: &str) -> Result<Option<&str>> {
        let txns = self.deserialized()?;
        for (i, txn) in txns.iter().enumerate() {
            if txn.signature == signature {
                return Ok(Some(&self.leaves[i]));
            }
        }
        Ok(None)
    }

    /// All transactions signed by the holder of `public_key`.
    pub fn txns_for_key(&self, public_key: &str) -> Result<Vec<&Transaction>> {
        Ok(self
            .deserialized()?
            .iter()
            .filter(|txn| txn.public_key == public_key)
            .collect())
    }
}

fn reduce_row(row: &[String]) -> Vec<String> {
    let mut parent = Vec::with_capacity(row.len() / 2 + 1);
    let mut chunks = row.chunks_exact(2);
    for pair in &mut chunks {
        parent.push(sha256_hex(&format!("{}{}", pair[0], pair[1])));
    }
    // Odd trailing hash is carried up unchanged.
    if let [last] = chunks.remainder() {
        parent.push(last.clone());
    }
    parent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{DataPayload, Payload, Transaction};

    fn leaves(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_txn(signature: &str, public_key: &str) -> Transaction {
        let payload = Payload::Data(DataPayload {
            group: "f7".to_string(),
            g: "2".to_string(),
            g_a: "1a".to_string(),
            g_r: "2b".to_string(),
            k: 1,
            secret: "deadbeef".to_string(),
            g_r_i: vec!["3c".to_string()],
            encrypted: None,
            encrypted_key: None,
        });
        let mut txn = Transaction::create(public_key.to_string(), payload, 1000);
        txn.signature = signature.to_string();
        txn
    }

    #[test]
    fn test_odd_carry_structure() {
        let tree = MerkleTree::from_leaves(leaves(&["a", "b", "c"])).unwrap();

        let ha = sha256_hex("a");
        let hb = sha256_hex("b");
        let hc = sha256_hex("c");
        let hab = sha256_hex(&format!("{}{}", ha, hb));
        let root = sha256_hex(&format!("{}{}", hab, hc));

        assert_eq!(tree.rows[0], vec![ha, hb, hc.clone()]);
        assert_eq!(tree.rows[1], vec![hab, hc]);
        assert_eq!(tree.root_hash(), root);
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let first = MerkleTree::from_leaves(leaves(&["a", "b", "c", "d"])).unwrap();
        let second = MerkleTree::from_leaves(leaves(&["a", "b", "c", "d"])).unwrap();
        let permuted = MerkleTree::from_leaves(leaves(&["b", "a", "c", "d"])).unwrap();

        assert_eq!(first, second);
        assert_ne!(first.root_hash(), permuted.root_hash());
    }

    #[test]
    fn test_single_leaf_root() {
        let tree = MerkleTree::from_leaves(leaves(&["only"])).unwrap();
        assert_eq!(tree.root_hash(), sha256_hex("only"));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(MerkleTree::from_leaves(Vec::new()).is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let tree = MerkleTree::from_leaves(leaves(&["a", "b", "c", "d", "e"])).unwrap();
        let restored = MerkleTree::from_json(&tree.serialize().unwrap()).unwrap();

        assert_eq!(restored, tree);
        assert_eq!(restored.root_hash(), tree.root_hash());
        assert!(restored.recompute_and_verify().unwrap());
    }

    #[test]
    fn test_tampered_tree_detected() {
        let tree = MerkleTree::from_leaves(leaves(&["a", "b"])).unwrap();
        let mut tampered = MerkleTree::from_json(&tree.serialize().unwrap()).unwrap();
        tampered.leaves[0] = "x".to_string();
        assert!(!tampered.recompute_and_verify().unwrap());
    }

    #[test]
    fn test_lazy_txn_lookup() {
        let alpha = sample_txn("sig-alpha", "KEY-1");
        let beta = sample_txn("sig-beta", "KEY-1");
        let gamma = sample_txn("sig-gamma", "KEY-2");
        let tree = MerkleTree::from_transactions(&[alpha.clone(), beta, gamma]).unwrap();

        assert_eq!(tree.txn_at(0).unwrap().signature, "sig-alpha");
        assert_eq!(tree.txn_at(2).unwrap().public_key, "KEY-2");
        assert!(tree.txn_at(3).is_err());

        let leaf = tree.find_txn_by_sig("sig-alpha").unwrap().unwrap();
        assert_eq!(leaf, alpha.serialize().unwrap());
        assert!(tree.find_txn_by_sig("missing").unwrap().is_none());

        assert_eq!(tree.txns_for_key("KEY-1").unwrap().len(), 2);
    }
}
