//! User-facing issuance workflows.
//!
//! A [`Wallet`] owns one user's RSA key pair and drives the full issue
//! path for each transaction type: build and sign the transaction, record
//! it `Pending` in the user's ledger, and bind its signature and public
//! key to the username so the reconciler can attribute it when the block
//! arrives.

use crate::crypto::{self, KeyPair};
use crate::error::{ChainError, Result};
use crate::generator::GenReply;
use crate::ledger::LedgerRecord;
use crate::persistence::Store;
use crate::protocol::{self, AnswerTxnBundle, DataTxnBundle, OwnerSecrets, RequestTxnBundle};
use crate::transaction::{DataPayload, Payload, Transaction};
use std::sync::Arc;
use tracing::info;

pub struct Wallet {
    store: Arc<dyn Store>,
    keypair: KeyPair,
    user: String,
}

impl Wallet {
    pub fn new(store: Arc<dyn Store>, keypair: KeyPair, user: String) -> Self {
        Wallet {
            store,
            keypair,
            user,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Issue a DATA transaction committing to `identity` under `id_key`,
    /// generating fresh DH material inline.
    pub fn issue_data_txn(
        &self,
        id_key: &str,
        identity: &str,
        k: usize,
        dh_bits: usize,
    ) -> Result<DataTxnBundle> {
        let bundle = protocol::create_data_txn(&self.keypair, id_key, identity, k, dh_bits)?;
        self.record_data_txn(&bundle, id_key, identity)?;
        Ok(bundle)
    }

    /// Issue a DATA transaction from material produced by the generation
    /// channel. The wallet only signs and records; the expensive DH work
    /// already happened.
    pub fn issue_data_txn_from_material(
        &self,
        id_key: &str,
        identity: &str,
        material: &GenReply,
    ) -> Result<DataTxnBundle> {
        let payload = Payload::Data(DataPayload {
            group: material.group.clone(),
            g: material.g.clone(),
            g_a: material.g_a.clone(),
            g_r: material.g_r.clone(),
            k: material.k,
            secret: material.secret.clone(),
            g_r_i: material.g_r_i.clone(),
            encrypted: Some(crypto::encrypt_for(
                &self.keypair.public_key,
                identity.as_bytes(),
            )?),
            encrypted_key: Some(crypto::encrypt_for(
                &self.keypair.public_key,
                id_key.as_bytes(),
            )?),
        });

        let mut txn = Transaction::create(
            self.keypair.public_key_pem()?,
            payload,
            chrono::Utc::now().timestamp_millis(),
        );
        txn.sign(&self.keypair.private_key)?;
        let serialized = txn.serialize()?;

        let bundle = DataTxnBundle {
            txn,
            serialized,
            secrets: OwnerSecrets {
                r: material.r.clone(),
                a: material.a.clone(),
                r_i: material.r_i.clone(),
            },
        };
        self.record_data_txn(&bundle, id_key, identity)?;
        Ok(bundle)
    }

    fn record_data_txn(&self, bundle: &DataTxnBundle, id_key: &str, identity: &str) -> Result<()> {
        let record = LedgerRecord::issued(
            &bundle.txn,
            bundle.serialized.clone(),
            Some(id_key.to_string()),
            Some(identity.to_string()),
            Some(bundle.secrets.clone()),
        );
        self.store.append_ledger(&self.user, &record)?;
        self.store
            .bind_signature_to_user(&bundle.txn.signature, &self.user)?;
        self.store
            .bind_public_key_to_user(&bundle.txn.public_key, &self.user)?;
        info!(user = %self.user, sig = %bundle.txn.signature, "issued DATA transaction");
        Ok(())
    }

    /// Issue a REQUEST challenging `data_txn` on `asking_identity`. When
    /// `disclose` carries a `(key, value)` pair, it is stashed for the
    /// link generator and released to this user once the owner's ANSWER
    /// is reconciled.
    pub fn issue_request_txn(
        &self,
        data_txn: &Transaction,
        data_blk_num: u64,
        asking_identity: &str,
        disclose: Option<(&str, &str)>,
    ) -> Result<RequestTxnBundle> {
        let bundle =
            protocol::create_request_txn(&self.keypair, data_txn, data_blk_num, asking_identity)?;

        let record = LedgerRecord::issued(&bundle.txn, bundle.serialized.clone(), None, None, None);
        self.store.append_ledger(&self.user, &record)?;
        self.store
            .bind_signature_to_user(&bundle.txn.signature, &self.user)?;
        self.store
            .bind_public_key_to_user(&bundle.txn.public_key, &self.user)?;

        if let Some((key, value)) = disclose {
            self.store
                .put_pending_disclosure(&bundle.txn.signature, key, value)?;
        }
        info!(user = %self.user, sig = %bundle.txn.signature, "issued REQUEST transaction");
        Ok(bundle)
    }

    /// Answer `req_txn` using the secrets retained when the referenced
    /// DATA transaction was issued from this wallet.
    pub fn issue_answer_txn(
        &self,
        req_txn: &Transaction,
        req_blk_num: u64,
    ) -> Result<AnswerTxnBundle> {
        let data_sig = req_txn.data_txn_sig()?;
        let ledger = self.store.get_ledger(&self.user)?;
        let data_record = ledger
            .iter()
            .find(|r| r.sig == data_sig)
            .ok_or_else(|| {
                ChainError::UnresolvedReference(format!(
                    "User '{}' holds no record for DATA transaction {}",
                    self.user, data_sig
                ))
            })?;
        let secrets = data_record.secret.as_ref().ok_or_else(|| {
            ChainError::UnresolvedReference(format!(
                "Record for {} retains no secrets; cannot answer",
                data_sig
            ))
        })?;
        let data_txn = Transaction::from_json(&data_record.serial)?;

        let bundle =
            protocol::create_answer_txn(&self.keypair, &data_txn, req_txn, req_blk_num, secrets)?;

        let record = LedgerRecord::issued(&bundle.txn, bundle.serialized.clone(), None, None, None);
        self.store.append_ledger(&self.user, &record)?;
        self.store
            .bind_signature_to_user(&bundle.txn.signature, &self.user)?;
        self.store
            .bind_public_key_to_user(&bundle.txn.public_key, &self.user)?;
        info!(user = %self.user, sig = %bundle.txn.signature, "issued ANSWER transaction");
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenRequest, LocalGenerator};
    use crate::ledger::RecordState;
    use crate::persistence::InMemoryStore;
    use crate::transaction::TxnType;

    fn wallet(store: Arc<InMemoryStore>, user: &str) -> Wallet {
        Wallet::new(store, KeyPair::generate(1024).unwrap(), user.to_string())
    }

    #[test]
    fn test_issue_data_txn_records_and_binds() {
        let store = Arc::new(InMemoryStore::new());
        let alice = wallet(store.clone(), "alice");

        let bundle = alice
            .issue_data_txn("email", "alice@example.edu", 2, 64)
            .unwrap();

        let ledger = store.get_ledger("alice").unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].state, RecordState::Pending);
        assert_eq!(ledger[0].sig, bundle.txn.signature);
        assert_eq!(ledger[0].key.as_deref(), Some("email"));
        assert_eq!(ledger[0].secret, Some(bundle.secrets.clone()));
        assert!(!ledger[0].is_confirmed());

        assert_eq!(
            store
                .username_for_signature(&bundle.txn.signature)
                .unwrap()
                .as_deref(),
            Some("alice")
        );
        assert_eq!(
            store
                .username_for_public_key(&bundle.txn.public_key)
                .unwrap()
                .as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_issue_from_generated_material() {
        let store = Arc::new(InMemoryStore::new());
        let alice = wallet(store.clone(), "alice");

        let material = LocalGenerator
            .generate(&GenRequest::new(2, "alice@example.edu".to_string(), 64))
            .unwrap();
        let bundle = alice
            .issue_data_txn_from_material("email", "alice@example.edu", &material)
            .unwrap();

        assert!(bundle.txn.verify_signature().unwrap());
        assert_eq!(bundle.txn.secret().unwrap(), material.secret);
        assert_eq!(bundle.secrets.r_i, material.r_i);

        let plain = crypto::decrypt_with(
            &alice.keypair().private_key,
            bundle.txn.encrypted().unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(plain, b"alice@example.edu");
    }

    #[test]
    fn test_request_with_disclosure_stashes_pending_entry() {
        let store = Arc::new(InMemoryStore::new());
        let alice = wallet(store.clone(), "alice");
        let bob = wallet(store.clone(), "bob");

        let data = alice
            .issue_data_txn("email", "alice@example.edu", 2, 64)
            .unwrap();
        let request = bob
            .issue_request_txn(
                &data.txn,
                5,
                "alice@example.edu",
                Some(("email", "bob@example.edu")),
            )
            .unwrap();

        assert_eq!(
            store
                .take_pending_disclosure(&request.txn.signature)
                .unwrap(),
            Some(("email".to_string(), "bob@example.edu".to_string()))
        );
        let ledger = store.get_ledger("bob").unwrap();
        assert_eq!(ledger[0].txn_type, TxnType::Request);
    }

    #[test]
    fn test_answer_uses_retained_secrets() {
        let store = Arc::new(InMemoryStore::new());
        let alice = wallet(store.clone(), "alice");
        let bob = wallet(store.clone(), "bob");

        let data = alice
            .issue_data_txn("email", "alice@example.edu", 3, 64)
            .unwrap();
        let request = bob
            .issue_request_txn(&data.txn, 5, "alice@example.edu", None)
            .unwrap();

        let answer = alice.issue_answer_txn(&request.txn, 6).unwrap();
        assert!(protocol::verify_answer_txn(
            &data.txn,
            &request.txn,
            &answer.txn,
            &request.b,
            "alice@example.edu",
        )
        .unwrap());

        // A wallet without the DATA record cannot answer.
        assert!(bob.issue_answer_txn(&request.txn, 6).is_err());
    }
}
