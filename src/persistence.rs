//! Database persistence layer for Chainge
//!
//! The reconciler and wallet talk to a keyed [`Store`]: per-user ledger
//! lists addressed by position, signature/public-key to username bindings,
//! the link-generator pending/permanent disclosure maps, and accepted
//! blocks by height. Two backends are provided: a rusqlite [`Database`]
//! and an [`InMemoryStore`] for tests and ephemeral runs.

use crate::error::ChainError;
use crate::ledger::{LedgerRecord, RequestRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Abstraction over the keyed store backing ledgers and bindings.
/// `replace_*_at` writes by positional index; callers observe indices via
/// the full-list getters, and the reconciler applies transactions
/// sequentially so indices cannot shift mid-update.
pub trait Store: Send + Sync {
    fn get_ledger(&self, user: &str) -> Result<Vec<LedgerRecord>, ChainError>;
    fn append_ledger(&self, user: &str, record: &LedgerRecord) -> Result<(), ChainError>;
    fn replace_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &LedgerRecord,
    ) -> Result<(), ChainError>;

    fn get_request_ledger(&self, user: &str) -> Result<Vec<RequestRecord>, ChainError>;
    fn append_request_ledger(&self, user: &str, record: &RequestRecord) -> Result<(), ChainError>;
    fn replace_request_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &RequestRecord,
    ) -> Result<(), ChainError>;

    fn username_for_signature(&self, sig: &str) -> Result<Option<String>, ChainError>;
    fn username_for_public_key(&self, public_key: &str) -> Result<Option<String>, ChainError>;
    fn bind_signature_to_user(&self, sig: &str, user: &str) -> Result<(), ChainError>;
    fn bind_public_key_to_user(&self, public_key: &str, user: &str) -> Result<(), ChainError>;

    /// Stash a `(key, value)` disclosure awaiting the ANSWER to `req_sig`.
    fn put_pending_disclosure(
        &self,
        req_sig: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChainError>;
    /// One-shot removal: returns the stashed pair and deletes it.
    fn take_pending_disclosure(
        &self,
        req_sig: &str,
    ) -> Result<Option<(String, String)>, ChainError>;
    fn put_link_info(&self, user: &str, key: &str, value: &str) -> Result<(), ChainError>;
    fn get_link_info(&self, user: &str) -> Result<Vec<(String, String)>, ChainError>;

    fn put_block(&self, height: u64, serialized: &str) -> Result<(), ChainError>;
    fn block_at(&self, height: u64) -> Result<Option<String>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        for ddl in [
            "CREATE TABLE IF NOT EXISTS ledger (
                user TEXT NOT NULL,
                idx INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (user, idx)
            )",
            "CREATE TABLE IF NOT EXISTS request_ledger (
                user TEXT NOT NULL,
                idx INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (user, idx)
            )",
            "CREATE TABLE IF NOT EXISTS sig_bindings (
                sig TEXT PRIMARY KEY,
                user TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS key_bindings (
                public_key TEXT PRIMARY KEY,
                user TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS pending_disclosures (
                req_sig TEXT PRIMARY KEY,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS link_info (
                user TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                data TEXT NOT NULL
            )",
        ] {
            conn.execute(ddl, [])
                .map_err(|e| ChainError::DatabaseError(format!("Failed to create table: {}", e)))?;
        }

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    fn get_records<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        user: &str,
    ) -> Result<Vec<T>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT record FROM {} WHERE user = ?1 ORDER BY idx ASC",
                table
            ))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![user], |row| row.get::<_, String>(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query ledger: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let json =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;
            records.push(serde_json::from_str(&json).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to deserialize record: {}", e))
            })?);
        }
        Ok(records)
    }

    fn append_record<T: serde::Serialize>(
        &self,
        table: &str,
        user: &str,
        record: &T,
    ) -> Result<(), ChainError> {
        let json = serde_json::to_string(record).map_err(|e| {
            ChainError::DatabaseError(format!("Failed to serialize record: {}", e))
        })?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (user, idx, record)
                 SELECT ?1, COALESCE(MAX(idx) + 1, 0), ?2 FROM {} WHERE user = ?1",
                table, table
            ),
            params![user, json],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to append record: {}", e)))?;
        Ok(())
    }

    fn replace_record_at<T: serde::Serialize>(
        &self,
        table: &str,
        user: &str,
        index: usize,
        record: &T,
    ) -> Result<(), ChainError> {
        let json = serde_json::to_string(record).map_err(|e| {
            ChainError::DatabaseError(format!("Failed to serialize record: {}", e))
        })?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                &format!("UPDATE {} SET record = ?3 WHERE user = ?1 AND idx = ?2", table),
                params![user, index as i64, json],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to replace record: {}", e)))?;
        if changed == 0 {
            return Err(ChainError::DatabaseError(format!(
                "No record at index {} for user '{}'",
                index, user
            )));
        }
        Ok(())
    }

    fn lookup_binding(&self, table: &str, needle: &str) -> Result<Option<String>, ChainError> {
        let conn = self.lock()?;
        let column = if table == "sig_bindings" { "sig" } else { "public_key" };
        conn.query_row(
            &format!("SELECT user FROM {} WHERE {} = ?1", table, column),
            params![needle],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to query binding: {}", e)))
    }
}

impl Store for Database {
    fn get_ledger(&self, user: &str) -> Result<Vec<LedgerRecord>, ChainError> {
        self.get_records("ledger", user)
    }

    fn append_ledger(&self, user: &str, record: &LedgerRecord) -> Result<(), ChainError> {
        self.append_record("ledger", user, record)
    }

    fn replace_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &LedgerRecord,
    ) -> Result<(), ChainError> {
        self.replace_record_at("ledger", user, index, record)
    }

    fn get_request_ledger(&self, user: &str) -> Result<Vec<RequestRecord>, ChainError> {
        self.get_records("request_ledger", user)
    }

    fn append_request_ledger(&self, user: &str, record: &RequestRecord) -> Result<(), ChainError> {
        self.append_record("request_ledger", user, record)
    }

    fn replace_request_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &RequestRecord,
    ) -> Result<(), ChainError> {
        self.replace_record_at("request_ledger", user, index, record)
    }

    fn username_for_signature(&self, sig: &str) -> Result<Option<String>, ChainError> {
        self.lookup_binding("sig_bindings", sig)
    }

    fn username_for_public_key(&self, public_key: &str) -> Result<Option<String>, ChainError> {
        self.lookup_binding("key_bindings", public_key)
    }

    fn bind_signature_to_user(&self, sig: &str, user: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sig_bindings (sig, user) VALUES (?1, ?2)",
            params![sig, user],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to bind signature: {}", e)))?;
        Ok(())
    }

    fn bind_public_key_to_user(&self, public_key: &str, user: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO key_bindings (public_key, user) VALUES (?1, ?2)",
            params![public_key, user],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to bind public key: {}", e)))?;
        Ok(())
    }

    fn put_pending_disclosure(
        &self,
        req_sig: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO pending_disclosures (req_sig, key, value) VALUES (?1, ?2, ?3)",
            params![req_sig, key, value],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to stash disclosure: {}", e)))?;
        Ok(())
    }

    fn take_pending_disclosure(
        &self,
        req_sig: &str,
    ) -> Result<Option<(String, String)>, ChainError> {
        let conn = self.lock()?;
        let found: Option<(String, String)> = conn
            .query_row(
                "SELECT key, value FROM pending_disclosures WHERE req_sig = ?1",
                params![req_sig],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query disclosure: {}", e)))?;
        if found.is_some() {
            conn.execute(
                "DELETE FROM pending_disclosures WHERE req_sig = ?1",
                params![req_sig],
            )
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to remove disclosure: {}", e))
            })?;
        }
        Ok(found)
    }

    fn put_link_info(&self, user: &str, key: &str, value: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO link_info (user, key, value) VALUES (?1, ?2, ?3)",
            params![user, key, value],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save link info: {}", e)))?;
        Ok(())
    }

    fn get_link_info(&self, user: &str) -> Result<Vec<(String, String)>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM link_info WHERE user = ?1 ORDER BY rowid ASC")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![user], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query link info: {}", e)))?;

        let mut info = Vec::new();
        for row in rows {
            info.push(
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(info)
    }

    fn put_block(&self, height: u64, serialized: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (height, data) VALUES (?1, ?2)",
            params![height as i64, serialized],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn block_at(&self, height: u64) -> Result<Option<String>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM blocks WHERE height = ?1",
            params![height as i64],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to query block: {}", e)))
    }
}

#[derive(Default)]
struct MemoryInner {
    ledgers: HashMap<String, Vec<LedgerRecord>>,
    request_ledgers: HashMap<String, Vec<RequestRecord>>,
    sig_bindings: HashMap<String, String>,
    key_bindings: HashMap<String, String>,
    pending_disclosures: HashMap<String, (String, String)>,
    link_info: HashMap<String, Vec<(String, String)>>,
    blocks: HashMap<u64, String>,
}

/// In-memory store for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }
}

impl Store for InMemoryStore {
    fn get_ledger(&self, user: &str) -> Result<Vec<LedgerRecord>, ChainError> {
        Ok(self.lock()?.ledgers.get(user).cloned().unwrap_or_default())
    }

    fn append_ledger(&self, user: &str, record: &LedgerRecord) -> Result<(), ChainError> {
        self.lock()?
            .ledgers
            .entry(user.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn replace_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &LedgerRecord,
    ) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        let ledger = inner.ledgers.entry(user.to_string()).or_default();
        let slot = ledger.get_mut(index).ok_or_else(|| {
            ChainError::DatabaseError(format!("No record at index {} for user '{}'", index, user))
        })?;
        *slot = record.clone();
        Ok(())
    }

    fn get_request_ledger(&self, user: &str) -> Result<Vec<RequestRecord>, ChainError> {
        Ok(self
            .lock()?
            .request_ledgers
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    fn append_request_ledger(&self, user: &str, record: &RequestRecord) -> Result<(), ChainError> {
        self.lock()?
            .request_ledgers
            .entry(user.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn replace_request_ledger_at(
        &self,
        user: &str,
        index: usize,
        record: &RequestRecord,
    ) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        let ledger = inner.request_ledgers.entry(user.to_string()).or_default();
        let slot = ledger.get_mut(index).ok_or_else(|| {
            ChainError::DatabaseError(format!("No record at index {} for user '{}'", index, user))
        })?;
        *slot = record.clone();
        Ok(())
    }

    fn username_for_signature(&self, sig: &str) -> Result<Option<String>, ChainError> {
        Ok(self.lock()?.sig_bindings.get(sig).cloned())
    }

    fn username_for_public_key(&self, public_key: &str) -> Result<Option<String>, ChainError> {
        Ok(self.lock()?.key_bindings.get(public_key).cloned())
    }

    fn bind_signature_to_user(&self, sig: &str, user: &str) -> Result<(), ChainError> {
        self.lock()?
            .sig_bindings
            .insert(sig.to_string(), user.to_string());
        Ok(())
    }

    fn bind_public_key_to_user(&self, public_key: &str, user: &str) -> Result<(), ChainError> {
        self.lock()?
            .key_bindings
            .insert(public_key.to_string(), user.to_string());
        Ok(())
    }

    fn put_pending_disclosure(
        &self,
        req_sig: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ChainError> {
        self.lock()?
            .pending_disclosures
            .insert(req_sig.to_string(), (key.to_string(), value.to_string()));
        Ok(())
    }

    fn take_pending_disclosure(
        &self,
        req_sig: &str,
    ) -> Result<Option<(String, String)>, ChainError> {
        Ok(self.lock()?.pending_disclosures.remove(req_sig))
    }

    fn put_link_info(&self, user: &str, key: &str, value: &str) -> Result<(), ChainError> {
        self.lock()?
            .link_info
            .entry(user.to_string())
            .or_default()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn get_link_info(&self, user: &str) -> Result<Vec<(String, String)>, ChainError> {
        Ok(self
            .lock()?
            .link_info
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    fn put_block(&self, height: u64, serialized: &str) -> Result<(), ChainError> {
        self.lock()?.blocks.insert(height, serialized.to_string());
        Ok(())
    }

    fn block_at(&self, height: u64) -> Result<Option<String>, ChainError> {
        Ok(self.lock()?.blocks.get(&height).cloned())
    }
}
