//! Peer broadcast and chain lookup client.
//!
//! Broadcast is fire-and-forget: a new transaction is POSTed to every
//! known peer and failures are only logged. Lookup polls the peer list
//! round-robin on a fixed cadence until one peer returns the transaction,
//! giving up after a bounded number of attempts.

use crate::error::{ChainError, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_ATTEMPTS: usize = 30;

#[derive(Deserialize)]
struct FindTxnResponse {
    value: Option<String>,
    err: Option<String>,
}

pub struct PeerClient {
    client: reqwest::Client,
    peers: Vec<String>,
    poll_interval: Duration,
    poll_attempts: usize,
}

impl PeerClient {
    pub fn new(peers: Vec<String>) -> Self {
        PeerClient {
            client: reqwest::Client::new(),
            peers,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, attempts: usize) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Send a serialized transaction to every peer. Unreachable peers are
    /// logged and skipped.
    pub async fn broadcast_txn(&self, serialized: &str) {
        for peer in &self.peers {
            let url = format!("{}/txn/new-txn", peer);
            match self
                .client
                .post(&url)
                .json(&json!({ "txn": serialized }))
                .send()
                .await
            {
                Ok(resp) => debug!(peer = %peer, status = %resp.status(), "broadcast transaction"),
                Err(e) => warn!(peer = %peer, error = %e, "failed to broadcast transaction"),
            }
        }
    }

    /// Locate the serialized transaction `txn_sig` inside block
    /// `block_num`, polling peers round-robin every `poll_interval` until
    /// one answers with a value.
    pub async fn find_txn_at(&self, block_num: u64, txn_sig: &str) -> Result<String> {
        if self.peers.is_empty() {
            return Err(ChainError::NetworkError(
                "No peers configured".to_string(),
            ));
        }

        for attempt in 0..self.poll_attempts {
            let peer = &self.peers[attempt % self.peers.len()];
            let url = format!("{}/chain/find_txn_at", peer);
            let result = self
                .client
                .get(&url)
                .query(&[
                    ("block_num", block_num.to_string()),
                    ("txn_sig", txn_sig.to_string()),
                ])
                .send()
                .await;

            match result {
                Ok(resp) => match resp.json::<FindTxnResponse>().await {
                    Ok(body) => {
                        if let Some(value) = body.value {
                            return Ok(value);
                        }
                        debug!(
                            peer = %peer,
                            err = body.err.as_deref().unwrap_or("not found"),
                            "peer has no such transaction"
                        );
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "malformed lookup response"),
                },
                Err(e) => warn!(peer = %peer, error = %e, "peer unreachable"),
            }

            if attempt + 1 < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(ChainError::UnresolvedReference(format!(
            "Transaction {} not found in block {} after {} attempts",
            txn_sig, block_num, self.poll_attempts
        )))
    }
}
