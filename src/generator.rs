//! Transaction-material generation channel.
//!
//! Generating DATA transaction material (safe-prime DH group, exponents,
//! commitments) is expensive, so it runs behind a request/reply channel
//! correlated by a caller-chosen token: the caller registers a one-shot
//! waiter for its token, submits the request, and the reply fires the
//! waiter exactly once. [`LocalGenerator`] serves the channel in-process;
//! the correlation table works the same against a remote generator.

use crate::error::{ChainError, Result};
use crate::protocol::{self, DhGroup};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Parameters for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenRequest {
    #[serde(rename = "K")]
    pub k: usize,
    pub identity: String,
    pub dh_key_size: usize,
    pub token: String,
}

impl GenRequest {
    pub fn new(k: usize, identity: String, dh_key_size: usize) -> Self {
        GenRequest {
            k,
            identity,
            dh_key_size,
            token: Uuid::new_v4().to_string(),
        }
    }
}

/// Generated cryptographic material, all hex encoded. Contains both the
/// public commitments and the owner-retained exponents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenReply {
    #[serde(rename = "G")]
    pub group: String,
    pub g: String,
    pub a: String,
    pub g_a: String,
    pub r: String,
    pub g_r: String,
    pub secret: String,
    pub r_i: Vec<String>,
    pub g_r_i: Vec<String>,
    #[serde(rename = "K")]
    pub k: usize,
}

/// Token-keyed one-shot waiters. A token can be claimed by exactly one
/// reply; firing removes it.
#[derive(Default)]
pub struct CorrelationTable {
    waiting: Mutex<HashMap<String, oneshot::Sender<GenReply>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<GenReply>>>> {
        self.waiting
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Register a waiter for `token`. Replaces any stale waiter.
    pub fn register(&self, token: &str) -> Result<oneshot::Receiver<GenReply>> {
        let (tx, rx) = oneshot::channel();
        self.lock()?.insert(token.to_string(), tx);
        Ok(rx)
    }

    /// Deliver a reply to the waiter registered for `token`, consuming the
    /// registration.
    pub fn fire(&self, token: &str, reply: GenReply) -> Result<()> {
        let sender = self.lock()?.remove(token).ok_or_else(|| {
            ChainError::UnresolvedReference(format!("No waiter registered for token '{}'", token))
        })?;
        sender.send(reply).map_err(|_| {
            ChainError::NetworkError(format!("Waiter for token '{}' went away", token))
        })
    }

    /// Drop a registration without firing it.
    pub fn remove(&self, token: &str) -> Result<()> {
        self.lock()?.remove(token);
        Ok(())
    }
}

/// In-process generator.
#[derive(Default)]
pub struct LocalGenerator;

impl LocalGenerator {
    pub fn generate(&self, request: &GenRequest) -> Result<GenReply> {
        if request.k == 0 {
            return Err(ChainError::InvalidInput(
                "K must be at least 1".to_string(),
            ));
        }

        let group = DhGroup::generate(request.dh_key_size);
        let a = group.random_exponent();
        let g_a = group.pow(&a);
        let r = group.random_exponent();
        let g_r = group.pow(&r);

        let mut r_i = Vec::with_capacity(request.k);
        let mut g_r_i = Vec::with_capacity(request.k);
        for _ in 0..request.k {
            let x = group.random_exponent();
            g_r_i.push(protocol::to_hex(&group.pow(&x)));
            r_i.push(protocol::to_hex(&x));
        }

        let secret = protocol::hash_to_int(&request.identity) + &g_r;

        Ok(GenReply {
            group: protocol::to_hex(&group.prime),
            g: protocol::to_hex(&group.generator),
            a: protocol::to_hex(&a),
            g_a: protocol::to_hex(&g_a),
            r: protocol::to_hex(&r),
            g_r: protocol::to_hex(&g_r),
            secret: protocol::to_hex(&secret),
            r_i,
            g_r_i,
            k: request.k,
        })
    }

    /// Serve one request through a correlation table, the way a remote
    /// generator would: generate, then fire the token's waiter.
    pub fn serve(&self, table: &CorrelationTable, request: &GenRequest) -> Result<()> {
        let reply = self.generate(request)?;
        table.fire(&request.token, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::biguint_from_hex;

    #[test]
    fn test_generated_material_is_consistent() {
        let request = GenRequest::new(3, "alice@example.edu".to_string(), 64);
        let reply = LocalGenerator.generate(&request).unwrap();

        assert_eq!(reply.k, 3);
        assert_eq!(reply.r_i.len(), 3);
        assert_eq!(reply.g_r_i.len(), 3);

        let group = DhGroup::from_hex(&reply.group, &reply.g).unwrap();
        let a = biguint_from_hex(&reply.a).unwrap();
        assert_eq!(protocol::to_hex(&group.pow(&a)), reply.g_a);

        let secret = biguint_from_hex(&reply.secret).unwrap();
        let g_r = biguint_from_hex(&reply.g_r).unwrap();
        assert_eq!(
            secret - protocol::hash_to_int("alice@example.edu"),
            g_r
        );
    }

    #[tokio::test]
    async fn test_correlation_is_one_shot() {
        let table = CorrelationTable::new();
        let request = GenRequest::new(1, "x".to_string(), 64);

        let rx = table.register(&request.token).unwrap();
        LocalGenerator.serve(&table, &request).unwrap();

        let reply = rx.await.unwrap();
        assert_eq!(reply.k, 1);

        // The token was consumed; a second fire finds no waiter.
        assert!(table
            .fire(&request.token, reply)
            .is_err());
    }

    #[tokio::test]
    async fn test_removed_token_never_fires() {
        let table = CorrelationTable::new();
        let rx = table.register("tok").unwrap();
        table.remove("tok").unwrap();

        assert!(table
            .fire(
                "tok",
                LocalGenerator
                    .generate(&GenRequest::new(1, "x".to_string(), 64))
                    .unwrap()
            )
            .is_err());
        assert!(rx.await.is_err());
    }
}
