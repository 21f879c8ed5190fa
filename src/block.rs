//! Blocks and block headers.
//!
//! A block is a [`BlockHeader`] plus a [`MerkleTree`] of transactions. The
//! header is created once at assembly and never mutated; all fields sit
//! behind accessors. Proof of work counts leading `'0'` hex digits of
//! `H(H(prev_hash + root_hash) + nonce)`.

use crate::canonical;
use crate::crypto::sha256_hex;
use crate::error::{ChainError, Result};
use crate::merkle::MerkleTree;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    prev_hash: String,
    timestamp: i64,
    nonce: String,
    difficulty: u32,
    hash: String,
    num_txns: usize,
    height: u64,
    root_hash: String,
}

impl BlockHeader {
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| ChainError::MalformedPayload(format!("Invalid block header: {}", e)))
    }

    pub fn serialize(&self) -> Result<String> {
        canonical::to_string(self)
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn block_hash(&self) -> &str {
        &self.hash
    }

    pub fn num_txns(&self) -> usize {
        self.num_txns
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }
}

/// Outer wire shape. The header and tree are embedded as JSON strings;
/// older peers sent the tree under `merkle_tree` instead of `block`, so
/// both keys are accepted on input.
#[derive(Deserialize)]
struct BlockWire {
    header: String,
    #[serde(default)]
    block: Option<String>,
    #[serde(default)]
    merkle_tree: Option<String>,
}

#[derive(Serialize)]
struct BlockWireOut<'a> {
    header: &'a str,
    block: &'a str,
}

#[derive(Debug, PartialEq)]
pub struct Block {
    header: BlockHeader,
    tree: MerkleTree,
}

impl Block {
    /// Build a block over `transactions`: construct the merkle tree, set
    /// `hash = SHA256(prev_hash + root_hash + nonce)`, freeze the header,
    /// then self-check that a serialize/deserialize round trip reproduces
    /// an identical block.
    pub fn assemble(
        prev_hash: &str,
        transactions: &[Transaction],
        nonce: &str,
        difficulty: u32,
        height: u64,
        timestamp: Option<i64>,
    ) -> Result<Self> {
        let tree = MerkleTree::from_transactions(transactions)?;
        let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let hash = sha256_hex(&format!("{}{}{}", prev_hash, tree.root_hash(), nonce));

        let header = BlockHeader {
            prev_hash: prev_hash.to_string(),
            timestamp,
            nonce: nonce.to_string(),
            difficulty,
            hash,
            num_txns: transactions.len(),
            height,
            root_hash: tree.root_hash().to_string(),
        };
        let block = Block { header, tree };

        let restored = Block::from_json(&block.serialize()?)?;
        if restored != block {
            return Err(ChainError::BlockIntegrity(
                "Serialization round trip did not reproduce the block".to_string(),
            ));
        }
        Ok(block)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let wire: BlockWire = serde_json::from_str(data)
            .map_err(|e| ChainError::MalformedPayload(format!("Invalid block: {}", e)))?;
        let tree_str = wire.block.or(wire.merkle_tree).ok_or_else(|| {
            ChainError::MalformedPayload("Block is missing its transaction tree".to_string())
        })?;
        Ok(Block {
            header: BlockHeader::from_json(&wire.header)?,
            tree: MerkleTree::from_json(&tree_str)?,
        })
    }

    pub fn serialize(&self) -> Result<String> {
        let header = self.header.serialize()?;
        let tree = self.tree.serialize()?;
        canonical::to_string(&BlockWireOut {
            header: &header,
            block: &tree,
        })
    }

    /// Proof-of-work predicate: the double-hashed digest must start with at
    /// least `difficulty` zero hex digits. Difficulty 0 always passes.
    pub fn verify_block(&self) -> bool {
        let digest = pow_digest(
            self.header.prev_hash(),
            self.header.root_hash(),
            self.header.nonce(),
        );
        leading_zeros(&digest) >= self.header.difficulty() as usize
    }

    /// [`verify_block`] as a `Result`, for call sites that propagate.
    pub fn ensure_pow(&self) -> Result<()> {
        if self.verify_block() {
            Ok(())
        } else {
            Err(ChainError::DifficultyNotSatisfied {
                difficulty: self.header.difficulty(),
            })
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn height(&self) -> u64 {
        self.header.height()
    }

    pub fn block_hash(&self) -> &str {
        self.header.block_hash()
    }

    pub fn root_hash(&self) -> &str {
        self.header.root_hash()
    }

    /// The serialized transaction carrying `signature`, if present.
    pub fn find_txn(&self, signature: &str) -> Result<Option<&str>> {
        self.tree.find_txn_by_sig(signature)
    }

    /// All transactions signed by `public_key`.
    pub fn txns_for_key(&self, public_key: &str) -> Result<Vec<&Transaction>> {
        self.tree.txns_for_key(public_key)
    }

    pub fn txns(&self) -> Result<&[Transaction]> {
        self.tree.txns()
    }
}

/// The digest the proof of work is measured on.
pub fn pow_digest(prev_hash: &str, root_hash: &str, nonce: &str) -> String {
    let inner = sha256_hex(&format!("{}{}", prev_hash, root_hash));
    sha256_hex(&format!("{}{}", inner, nonce))
}

fn leading_zeros(digest: &str) -> usize {
    digest.chars().take_while(|c| *c == '0').count()
}

/// Search nonces until the proof-of-work predicate holds. Nonces are
/// decimal counters starting from 0.
pub fn mine_nonce(prev_hash: &str, root_hash: &str, difficulty: u32) -> String {
    let mut counter: u64 = 0;
    loop {
        let nonce = counter.to_string();
        if leading_zeros(&pow_digest(prev_hash, root_hash, &nonce)) >= difficulty as usize {
            return nonce;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{DataPayload, Payload, Transaction};

    fn sample_txns(count: usize) -> Vec<Transaction> {
        (0..count)
            .map(|i| {
                let payload = Payload::Data(DataPayload {
                    group: "f7".to_string(),
                    g: "2".to_string(),
                    g_a: format!("{:x}", i + 10),
                    g_r: "2b".to_string(),
                    k: 1,
                    secret: "deadbeef".to_string(),
                    g_r_i: vec!["3c".to_string()],
                    encrypted: None,
                    encrypted_key: None,
                });
                let mut txn = Transaction::create(format!("KEY-{}", i), payload, 1000 + i as i64);
                txn.signature = format!("sig-{}", i);
                txn
            })
            .collect()
    }

    #[test]
    fn test_assemble_sets_header_fields() {
        let txns = sample_txns(3);
        let block = Block::assemble("prev", &txns, "42", 2, 7, Some(5000)).unwrap();

        let header = block.header();
        assert_eq!(header.prev_hash(), "prev");
        assert_eq!(header.nonce(), "42");
        assert_eq!(header.difficulty(), 2);
        assert_eq!(header.height(), 7);
        assert_eq!(header.timestamp(), 5000);
        assert_eq!(header.num_txns(), 3);
        assert_eq!(
            header.block_hash(),
            sha256_hex(&format!("prev{}42", header.root_hash()))
        );
    }

    #[test]
    fn test_difficulty_zero_always_verifies() {
        let block = Block::assemble("prev", &sample_txns(2), "nonce", 0, 1, Some(1)).unwrap();
        assert!(block.verify_block());
        assert!(block.ensure_pow().is_ok());
    }

    #[test]
    fn test_mined_block_verifies() {
        let txns = sample_txns(2);
        let root = crate::merkle::MerkleTree::from_transactions(&txns)
            .unwrap()
            .root_hash()
            .to_string();
        let nonce = mine_nonce("prev", &root, 1);

        let block = Block::assemble("prev", &txns, &nonce, 1, 1, Some(1)).unwrap();
        assert!(block.verify_block());
    }

    #[test]
    fn test_unsatisfied_difficulty_rejected() {
        let txns = sample_txns(2);
        let root = crate::merkle::MerkleTree::from_transactions(&txns)
            .unwrap()
            .root_hash()
            .to_string();
        // Find a nonce whose digest has no leading zero at all.
        let mut counter = 0u64;
        let nonce = loop {
            let candidate = counter.to_string();
            if !pow_digest("prev", &root, &candidate).starts_with('0') {
                break candidate;
            }
            counter += 1;
        };

        let block = Block::assemble("prev", &txns, &nonce, 3, 1, Some(1)).unwrap();
        assert!(!block.verify_block());
        assert!(matches!(
            block.ensure_pow(),
            Err(ChainError::DifficultyNotSatisfied { difficulty: 3 })
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let block = Block::assemble("prev", &sample_txns(4), "9", 0, 3, Some(777)).unwrap();
        let restored = Block::from_json(&block.serialize().unwrap()).unwrap();

        assert_eq!(restored, block);
        assert_eq!(restored.height(), 3);
        assert_eq!(restored.root_hash(), block.root_hash());
    }

    #[test]
    fn test_merkle_tree_key_accepted() {
        let block = Block::assemble("prev", &sample_txns(2), "1", 0, 1, Some(1)).unwrap();
        let header = block.header().serialize().unwrap();
        let tree = block.tree().serialize().unwrap();
        let wire = serde_json::json!({ "header": header, "merkle_tree": tree }).to_string();

        let restored = Block::from_json(&wire).unwrap();
        assert_eq!(restored, block);
    }

    #[test]
    fn test_txn_lookup_delegates_to_tree() {
        let block = Block::assemble("prev", &sample_txns(3), "1", 0, 1, Some(1)).unwrap();
        assert!(block.find_txn("sig-1").unwrap().is_some());
        assert!(block.find_txn("absent").unwrap().is_none());
        assert_eq!(block.txns_for_key("KEY-2").unwrap().len(), 1);
    }
}
