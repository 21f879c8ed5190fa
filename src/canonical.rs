//! Canonical JSON serialization.
//!
//! Every structure that gets hashed or signed (transaction payloads, whole
//! transactions, merkle trees, block headers) must serialize to the exact
//! same bytes on every node, or signatures and merkle roots stop lining up.
//! The wire format is JSON with object keys sorted at every nesting level.
//!
//! `serde_json`'s default `Map` is backed by a `BTreeMap`, so routing a
//! value through `serde_json::Value` yields sorted keys for free. The
//! `preserve_order` feature must never be enabled on this crate's
//! dependency graph.

use crate::error::Result;
use serde::Serialize;

/// Serialize `value` as canonical (sorted-key) JSON.
pub fn to_string<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}
