//! Chainge - an identity-attestation ledger
//!
//! Users commit blinded identities to the chain with DATA transactions,
//! challenge each other's commitments with REQUEST transactions, and
//! selectively disclose derived secrets with ANSWER transactions. Accepted
//! blocks are reconciled into per-user ledgers.
//!
//! # Architecture
//!
//! ## Core Chain
//! - [`transaction`] - DATA / REQUEST / ANSWER transaction model
//! - [`merkle`] - Merkle tree over serialized transactions
//! - [`block`] - Blocks, headers and proof of work
//! - [`reconcile`] - Applying accepted blocks to per-user ledgers
//!
//! ## Identity Protocol
//! - [`protocol`] - DH commitments, challenges and answers
//! - [`generator`] - Transaction-material generation channel
//!
//! ## Cryptography
//! - [`crypto`] - RSA-SHA256 signatures, hashing, key handling
//! - [`canonical`] - Canonical (sorted-key) JSON serialization
//!
//! ## State Management
//! - [`ledger`] - Per-user ledger record types
//! - [`persistence`] - Keyed store (SQLite and in-memory)
//! - [`wallet`] - Issuance workflows
//!
//! ## Networking
//! - [`api`] - HTTP endpoints (good-block ingestion, chain lookup)
//! - [`peers`] - Peer broadcast and polling lookup client
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Chain
// ============================================================================
pub mod block;
pub mod merkle;
pub mod reconcile;
pub mod transaction;

// ============================================================================
// Identity Protocol
// ============================================================================
pub mod generator;
pub mod protocol;

// ============================================================================
// Cryptography
// ============================================================================
pub mod canonical;
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod ledger;
pub mod persistence;
pub mod wallet;

// ============================================================================
// Networking
// ============================================================================
pub mod api;
pub mod peers;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
