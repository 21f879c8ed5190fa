//! Per-user ledger records.
//!
//! A [`LedgerRecord`] tracks one transaction the user issued or was
//! attributed in an accepted block. Records are created `Pending` at issue
//! time, flip to `Accepted` when a good block containing them arrives, and
//! are mutated in place by positional index; they are never deleted.
//! `block_num` is absent until confirmation and its presence is the sole
//! "confirmed" flag.
//!
//! A [`RequestRecord`] tracks a REQUEST aimed at one of the user's DATA
//! transactions, with an `answered` flag flipped by the matching ANSWER.

use crate::protocol::OwnerSecrets;
use crate::transaction::{Transaction, TxnType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Pending,
    Accepted,
}

/// Requester name used when a REQUEST's public key resolves to no local
/// user.
pub const UNIDENTIFIED: &str = "unidentified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Serialized transaction, as broadcast.
    pub serial: String,
    /// Transaction signature; the record's identity.
    pub sig: String,
    pub state: RecordState,
    #[serde(rename = "type")]
    pub txn_type: TxnType,
    /// Plaintext identity key (e.g. "email"). Only the owner's own records
    /// carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Plaintext identity value. Only the owner's own records carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Retained exponents for answering challenges (DATA records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<OwnerSecrets>,
    /// Height of the accepted block containing the transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_num: Option<u64>,
    /// Signatures of REQUESTs observed against this DATA record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<String>,
}

impl LedgerRecord {
    /// Record for a transaction this user just issued; confirmed later.
    pub fn issued(
        txn: &Transaction,
        serial: String,
        key: Option<String>,
        value: Option<String>,
        secret: Option<OwnerSecrets>,
    ) -> Self {
        LedgerRecord {
            serial,
            sig: txn.signature.clone(),
            state: RecordState::Pending,
            txn_type: txn.txn_type(),
            key,
            value,
            secret,
            block_num: None,
            requests: Vec::new(),
        }
    }

    /// Record for a transaction first observed in an accepted block.
    pub fn observed(txn: &Transaction, serial: String, block_num: u64) -> Self {
        LedgerRecord {
            serial,
            sig: txn.signature.clone(),
            state: RecordState::Accepted,
            txn_type: txn.txn_type(),
            key: None,
            value: None,
            secret: None,
            block_num: Some(block_num),
            requests: Vec::new(),
        }
    }

    pub fn mark_accepted(&mut self, block_num: u64) {
        self.state = RecordState::Accepted;
        self.block_num = Some(block_num);
    }

    pub fn is_confirmed(&self) -> bool {
        self.block_num.is_some()
    }

    /// Note a REQUEST against this record. Duplicates are ignored so block
    /// reapplication stays idempotent.
    pub fn note_request(&mut self, req_sig: &str) -> bool {
        if self.requests.iter().any(|sig| sig == req_sig) {
            false
        } else {
            self.requests.push(req_sig.to_string());
            true
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Signature of the REQUEST transaction.
    pub sig: String,
    pub state: RecordState,
    /// Resolved requester username, or [`UNIDENTIFIED`].
    pub requester: String,
    /// The identity key the request is about, when resolvable from the
    /// owner's DATA record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub answered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_num: Option<u64>,
}

impl RequestRecord {
    pub fn new(sig: String, requester: String, key: Option<String>, block_num: u64) -> Self {
        RequestRecord {
            sig,
            state: RecordState::Accepted,
            requester,
            key,
            answered: false,
            block_num: Some(block_num),
        }
    }

    pub fn mark_answered(&mut self, block_num: u64) {
        self.answered = true;
        self.block_num = Some(block_num);
    }
}
