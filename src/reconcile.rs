//! Chain reconciliation: applying accepted blocks to per-user ledgers.
//!
//! A "good block" arrives already mined and agreed on; this module's job
//! is bookkeeping. Every contained transaction is resolved to a local
//! user via the signature / public-key bindings, then the user's ledger
//! records move `Pending -> Accepted` (or new `Accepted` records appear
//! for transactions that originated elsewhere). REQUEST transactions add
//! request records on the targeted owner's side; ANSWER transactions flip
//! the matching request record to answered and promote any stashed
//! link-generator disclosure.
//!
//! Transactions are applied strictly in leaf order and one at a time:
//! records are addressed by positional index, so two transactions of one
//! block must never race on the same user's ledger. A failure on one
//! transaction is logged and skipped; it never aborts the rest of the
//! block.

use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::ledger::{LedgerRecord, RequestRecord, UNIDENTIFIED};
use crate::persistence::Store;
use crate::transaction::{Transaction, TxnType};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Reconciler { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Ingest an accepted block. Returns the block height on success.
    /// Applying the same block twice is a no-op beyond the first run.
    pub fn receive_good_block(&self, serialized: &str) -> Result<u64> {
        let block = Block::from_json(serialized)?;
        let height = block.height();
        self.store.put_block(height, serialized)?;

        let txns = block.txns()?;
        info!(height, num_txns = txns.len(), "applying good block");

        for (position, txn) in txns.iter().enumerate() {
            if let Err(e) = self.apply_txn(txn, height) {
                warn!(
                    height,
                    position,
                    sig = %txn.signature,
                    error = %e,
                    "skipping transaction"
                );
            }
        }
        Ok(height)
    }

    fn apply_txn(&self, txn: &Transaction, height: u64) -> Result<()> {
        let owner = self.store.username_for_public_key(&txn.public_key)?;
        if let Some(user) = &owner {
            self.confirm_in_ledger(user, txn, height)?;
        } else {
            debug!(sig = %txn.signature, "no local user for transaction key");
        }

        match txn.txn_type() {
            TxnType::Data => Ok(()),
            TxnType::Request => self.apply_request(txn, owner.as_deref(), height),
            TxnType::Answer => self.apply_answer(txn, height),
        }
    }

    /// Mark the user's matching record as accepted, or insert a fresh
    /// accepted record when the transaction was issued elsewhere.
    fn confirm_in_ledger(&self, user: &str, txn: &Transaction, height: u64) -> Result<()> {
        let ledger = self.store.get_ledger(user)?;
        match ledger.iter().position(|r| r.sig == txn.signature) {
            Some(index) => {
                let mut record = ledger[index].clone();
                record.mark_accepted(height);
                self.store.replace_ledger_at(user, index, &record)
            }
            None => {
                let record = LedgerRecord::observed(txn, txn.serialize()?, height);
                self.store.append_ledger(user, &record)
            }
        }
    }

    /// A REQUEST targets the owner of the referenced DATA transaction:
    /// record it on the owner's side, carrying the resolved requester name
    /// and the identity key being asked about.
    fn apply_request(&self, txn: &Transaction, requester: Option<&str>, height: u64) -> Result<()> {
        let data_sig = txn.data_txn_sig()?;
        let target = self.store.username_for_signature(data_sig)?.ok_or_else(|| {
            ChainError::UnresolvedReference(format!(
                "DATA transaction {} has no local owner",
                data_sig
            ))
        })?;

        // The REQUEST payload carries no identity key; it comes from the
        // owner's own DATA record when one exists.
        let ledger = self.store.get_ledger(&target)?;
        let data_index = ledger.iter().position(|r| r.sig == data_sig);
        let key = data_index.and_then(|i| ledger[i].key.clone());

        if let Some(index) = data_index {
            let mut record = ledger[index].clone();
            if record.note_request(&txn.signature) {
                self.store.replace_ledger_at(&target, index, &record)?;
            }
        }

        let requester = requester.unwrap_or(UNIDENTIFIED).to_string();
        self.upsert_request_record(&target, txn, requester, key, height)
    }

    fn upsert_request_record(
        &self,
        user: &str,
        txn: &Transaction,
        requester: String,
        key: Option<String>,
        height: u64,
    ) -> Result<()> {
        let requests = self.store.get_request_ledger(user)?;
        match requests.iter().position(|r| r.sig == txn.signature) {
            Some(index) => {
                let mut record = requests[index].clone();
                record.block_num = Some(height);
                self.store.replace_request_ledger_at(user, index, &record)
            }
            None => {
                let record = RequestRecord::new(txn.signature.clone(), requester, key, height);
                self.store.append_request_ledger(user, &record)
            }
        }
    }

    /// An ANSWER resolves the requester through the referenced REQUEST's
    /// signature, flips the matching request records to answered, and
    /// promotes any pending link-generator disclosure in one shot.
    fn apply_answer(&self, txn: &Transaction, height: u64) -> Result<()> {
        let req_sig = txn.req_txn_sig()?;
        let requester = self.store.username_for_signature(req_sig)?;
        let data_owner = self.store.username_for_signature(txn.data_txn_sig()?)?;

        let mut touched = false;
        for user in [&requester, &data_owner].into_iter().flatten() {
            let requests = self.store.get_request_ledger(user)?;
            if let Some(index) = requests.iter().position(|r| r.sig == req_sig) {
                let mut record = requests[index].clone();
                record.mark_answered(height);
                self.store.replace_request_ledger_at(user, index, &record)?;
                touched = true;
            }
        }
        if !touched {
            return Err(ChainError::UnresolvedReference(format!(
                "No request record found for REQUEST {}",
                req_sig
            )));
        }

        if let Some((key, value)) = self.store.take_pending_disclosure(req_sig)? {
            match &requester {
                Some(user) => {
                    self.store.put_link_info(user, &key, &value)?;
                    info!(user = %user, key = %key, "promoted pending disclosure");
                }
                None => warn!(
                    req_sig = %req_sig,
                    "pending disclosure dropped: requester unresolved"
                ),
            }
        }
        Ok(())
    }
}
