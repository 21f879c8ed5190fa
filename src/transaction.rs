//! Transaction model: DATA / REQUEST / ANSWER
//!
//! A transaction is immutable once signed. On the wire it is a canonical
//! JSON object `{payload, public_key, signature}` where `payload` is itself
//! a canonical JSON *string* of the type-specific fields plus `timestamp`
//! and `type`. The signature covers exactly that payload string.

use crate::canonical;
use crate::crypto;
use crate::error::{ChainError, Result};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transaction type discriminant as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TxnType {
    Data = 0,
    Request = 1,
    Answer = 2,
}

impl From<TxnType> for u8 {
    fn from(value: TxnType) -> u8 {
        value as u8
    }
}

impl TryFrom<u8> for TxnType {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TxnType::Data),
            1 => Ok(TxnType::Request),
            2 => Ok(TxnType::Answer),
            other => Err(ChainError::MalformedPayload(format!(
                "Unknown transaction type {}",
                other
            ))),
        }
    }
}

impl TxnType {
    pub fn name(&self) -> &'static str {
        match self {
            TxnType::Data => "DATA",
            TxnType::Request => "REQUEST",
            TxnType::Answer => "ANSWER",
        }
    }
}

/// DATA payload: a blinded identity commitment.
///
/// All big integers travel as lowercase hex strings; `secret` is the
/// *unreduced* sum `H(identity) + g^r mod G`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    /// DH group prime.
    #[serde(rename = "G")]
    pub group: String,
    /// DH group generator.
    pub g: String,
    /// g^a mod G, the owner's long-lived DH public value.
    pub g_a: String,
    /// g^r mod G, commitment to the blinding exponent.
    pub g_r: String,
    /// Number of auxiliary secrets.
    #[serde(rename = "K")]
    pub k: usize,
    /// H(identity) + g_r, plain big-integer addition.
    pub secret: String,
    /// Commitments g^{r_i} mod G to the K auxiliary secrets.
    pub g_r_i: Vec<String>,
    /// RSA-wrapped identity value for off-chain storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
    /// RSA-wrapped identity key (e.g. "email") for off-chain storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
}

/// REQUEST payload: a DH challenge against a DATA transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// g^b mod G, the challenger's fresh DH public value.
    pub g_b: String,
    /// (g^{g^{ab}} mod G) * (secret - H(asked identity)); signed, unreduced.
    pub g_g_ab_p_r: String,
    /// Bit string of length K; bit i selects which form of r_i to disclose.
    pub req: String,
    pub data_blk_num: u64,
    pub data_txn_sig: String,
}

/// ANSWER payload: partial disclosure responding to a REQUEST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Revealed values, one per challenge bit.
    pub res: Vec<String>,
    pub data_blk_num: u64,
    pub data_txn_sig: String,
    pub req_blk_num: u64,
    pub req_txn_sig: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Data(DataPayload),
    Request(RequestPayload),
    Answer(AnswerPayload),
}

impl Payload {
    pub fn txn_type(&self) -> TxnType {
        match self {
            Payload::Data(_) => TxnType::Data,
            Payload::Request(_) => TxnType::Request,
            Payload::Answer(_) => TxnType::Answer,
        }
    }
}

/// Outer wire shape of a transaction. `payload` is normally an embedded
/// canonical JSON string, but the original node also accepted an inline
/// object, so deserialization tolerates both.
#[derive(Deserialize)]
struct WireTxn {
    payload: Value,
    public_key: String,
    signature: String,
}

#[derive(Serialize)]
struct WireTxnOut<'a> {
    payload: &'a str,
    public_key: &'a str,
    signature: &'a str,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub signature: String,
    pub public_key: String,
    pub timestamp: i64,
    payload: Payload,
}

/// Identity within a well-formed chain is the signature; the original
/// compared signature and public key.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature && self.public_key == other.public_key
    }
}

impl Transaction {
    /// Assemble an unsigned transaction. `sign` must be called before the
    /// transaction is serialized for broadcast.
    pub fn create(public_key: String, payload: Payload, timestamp: i64) -> Self {
        Transaction {
            signature: String::new(),
            public_key,
            timestamp,
            payload,
        }
    }

    /// Parse a transaction from its serialized JSON form.
    pub fn from_json(data: &str) -> Result<Self> {
        let wire: WireTxn = serde_json::from_str(data)
            .map_err(|e| ChainError::MalformedPayload(format!("Invalid transaction: {}", e)))?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireTxn) -> Result<Self> {
        let payload_value: Value = match wire.payload {
            Value::String(inner) => serde_json::from_str(&inner).map_err(|e| {
                ChainError::MalformedPayload(format!("Invalid payload string: {}", e))
            })?,
            value @ Value::Object(_) => value,
            _ => {
                return Err(ChainError::MalformedPayload(
                    "Payload must be a JSON object or an embedded JSON string".to_string(),
                ))
            }
        };

        let type_code = payload_value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::MalformedPayload("Payload is missing 'type'".to_string()))?;
        let txn_type = u8::try_from(type_code)
            .map_err(|_| {
                ChainError::MalformedPayload(format!("Unknown transaction type {}", type_code))
            })
            .and_then(TxnType::try_from)?;

        let timestamp = payload_value
            .get("timestamp")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ChainError::MalformedPayload("Payload is missing 'timestamp'".to_string())
            })?;

        let payload = match txn_type {
            TxnType::Data => Payload::Data(parse_fields(payload_value)?),
            TxnType::Request => Payload::Request(parse_fields(payload_value)?),
            TxnType::Answer => Payload::Answer(parse_fields(payload_value)?),
        };

        Ok(Transaction {
            signature: wire.signature,
            public_key: wire.public_key,
            timestamp,
            payload,
        })
    }

    /// Canonical JSON of the payload fields plus `timestamp` and `type`.
    /// This is the exact string that gets signed.
    pub fn serialize_payload(&self) -> Result<String> {
        let mut map = match serde_json::to_value(&self.payload)? {
            Value::Object(map) => map,
            _ => {
                return Err(ChainError::SerializationError(
                    "Payload did not serialize to an object".to_string(),
                ))
            }
        };
        map.insert("timestamp".to_string(), Value::from(self.timestamp));
        map.insert("type".to_string(), Value::from(u8::from(self.txn_type())));
        Ok(serde_json::to_string(&Value::Object(map))?)
    }

    /// Serialize the whole transaction for hashing, storage or broadcast.
    pub fn serialize(&self) -> Result<String> {
        let payload = self.serialize_payload()?;
        canonical::to_string(&WireTxnOut {
            payload: &payload,
            public_key: &self.public_key,
            signature: &self.signature,
        })
    }

    /// Compute the RSA-SHA256 signature over the canonical payload string.
    pub fn sign(&mut self, private_key: &RsaPrivateKey) -> Result<()> {
        let payload = self.serialize_payload()?;
        self.signature = crypto::sign_message(private_key, &payload);
        Ok(())
    }

    /// Verify `signature` against `public_key` over the canonical payload.
    pub fn verify_signature(&self) -> Result<bool> {
        let payload = self.serialize_payload()?;
        crypto::verify_signature(&self.public_key, &payload, &self.signature)
    }

    pub fn txn_type(&self) -> TxnType {
        self.payload.txn_type()
    }

    /// Whether the claimed creation time is not in the future.
    pub fn timestamp_is_past(&self) -> bool {
        chrono::Utc::now().timestamp_millis() > self.timestamp
    }

    fn wrong_type(&self, field: &'static str) -> ChainError {
        ChainError::WrongTransactionType {
            field,
            found: u8::from(self.txn_type()),
        }
    }

    fn as_data(&self, field: &'static str) -> Result<&DataPayload> {
        match &self.payload {
            Payload::Data(data) => Ok(data),
            _ => Err(self.wrong_type(field)),
        }
    }

    fn as_request(&self, field: &'static str) -> Result<&RequestPayload> {
        match &self.payload {
            Payload::Request(request) => Ok(request),
            _ => Err(self.wrong_type(field)),
        }
    }

    fn as_answer(&self, field: &'static str) -> Result<&AnswerPayload> {
        match &self.payload {
            Payload::Answer(answer) => Ok(answer),
            _ => Err(self.wrong_type(field)),
        }
    }

    // DATA accessors

    pub fn group(&self) -> Result<&str> {
        Ok(&self.as_data("G")?.group)
    }

    pub fn generator(&self) -> Result<&str> {
        Ok(&self.as_data("g")?.g)
    }

    pub fn g_a(&self) -> Result<&str> {
        Ok(&self.as_data("g_a")?.g_a)
    }

    pub fn g_r(&self) -> Result<&str> {
        Ok(&self.as_data("g_r")?.g_r)
    }

    pub fn g_r_i(&self) -> Result<&[String]> {
        Ok(&self.as_data("g_r_i")?.g_r_i)
    }

    pub fn k(&self) -> Result<usize> {
        Ok(self.as_data("K")?.k)
    }

    pub fn secret(&self) -> Result<&str> {
        Ok(&self.as_data("secret")?.secret)
    }

    pub fn encrypted(&self) -> Result<Option<&str>> {
        Ok(self.as_data("encrypted")?.encrypted.as_deref())
    }

    pub fn encrypted_key(&self) -> Result<Option<&str>> {
        Ok(self.as_data("encrypted_key")?.encrypted_key.as_deref())
    }

    // REQUEST accessors

    pub fn g_b(&self) -> Result<&str> {
        Ok(&self.as_request("g_b")?.g_b)
    }

    pub fn challenge(&self) -> Result<&str> {
        Ok(&self.as_request("g_g_ab_p_r")?.g_g_ab_p_r)
    }

    pub fn req(&self) -> Result<&str> {
        Ok(&self.as_request("req")?.req)
    }

    // ANSWER accessors

    pub fn res(&self) -> Result<&[String]> {
        Ok(&self.as_answer("res")?.res)
    }

    pub fn req_blk_num(&self) -> Result<u64> {
        Ok(self.as_answer("req_blk_num")?.req_blk_num)
    }

    pub fn req_txn_sig(&self) -> Result<&str> {
        Ok(&self.as_answer("req_txn_sig")?.req_txn_sig)
    }

    // Shared REQUEST/ANSWER pointers

    pub fn data_blk_num(&self) -> Result<u64> {
        match &self.payload {
            Payload::Request(request) => Ok(request.data_blk_num),
            Payload::Answer(answer) => Ok(answer.data_blk_num),
            _ => Err(self.wrong_type("data_blk_num")),
        }
    }

    pub fn data_txn_sig(&self) -> Result<&str> {
        match &self.payload {
            Payload::Request(request) => Ok(&request.data_txn_sig),
            Payload::Answer(answer) => Ok(&answer.data_txn_sig),
            _ => Err(self.wrong_type("data_txn_sig")),
        }
    }
}

fn parse_fields<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ChainError::MalformedPayload(format!("Invalid payload fields: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn sample_data_payload() -> Payload {
        Payload::Data(DataPayload {
            group: "f7".to_string(),
            g: "2".to_string(),
            g_a: "1a".to_string(),
            g_r: "2b".to_string(),
            k: 2,
            secret: "deadbeef".to_string(),
            g_r_i: vec!["3c".to_string(), "4d".to_string()],
            encrypted: None,
            encrypted_key: None,
        })
    }

    fn sample_request_payload() -> Payload {
        Payload::Request(RequestPayload {
            g_b: "5e".to_string(),
            g_g_ab_p_r: "-1f".to_string(),
            req: "01".to_string(),
            data_blk_num: 5,
            data_txn_sig: "abc123".to_string(),
        })
    }

    #[test]
    fn test_payload_string_is_canonical() {
        let txn = Transaction::create("PUB".to_string(), sample_data_payload(), 1000);
        let payload = txn.serialize_payload().unwrap();
        assert_eq!(
            payload,
            r#"{"G":"f7","K":2,"g":"2","g_a":"1a","g_r":"2b","g_r_i":["3c","4d"],"secret":"deadbeef","timestamp":1000,"type":0}"#
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate(1024).unwrap();
        let pem = keypair.public_key_pem().unwrap();
        let mut txn = Transaction::create(pem, sample_data_payload(), 1000);
        txn.sign(&keypair.private_key).unwrap();
        assert!(txn.verify_signature().unwrap());

        // Any payload change invalidates the signature.
        txn.timestamp += 1;
        assert!(!txn.verify_signature().unwrap());
    }

    #[test]
    fn test_serialize_round_trip() {
        let keypair = KeyPair::generate(1024).unwrap();
        let pem = keypair.public_key_pem().unwrap();
        let mut txn = Transaction::create(pem, sample_request_payload(), 2000);
        txn.sign(&keypair.private_key).unwrap();

        let serialized = txn.serialize().unwrap();
        let restored = Transaction::from_json(&serialized).unwrap();

        assert_eq!(restored, txn);
        assert_eq!(restored.timestamp, 2000);
        assert_eq!(restored.txn_type(), TxnType::Request);
        assert_eq!(restored.req().unwrap(), "01");
        assert_eq!(restored.challenge().unwrap(), "-1f");
        assert!(restored.verify_signature().unwrap());
        // Re-serializing must reproduce the exact bytes.
        assert_eq!(restored.serialize().unwrap(), serialized);
    }

    #[test]
    fn test_inline_payload_object_accepted() {
        let raw = r#"{"payload":{"g_b":"5e","g_g_ab_p_r":"1f","req":"10","data_blk_num":4,"data_txn_sig":"sig","timestamp":7,"type":1},"public_key":"PUB","signature":"SIG"}"#;
        let txn = Transaction::from_json(raw).unwrap();
        assert_eq!(txn.txn_type(), TxnType::Request);
        assert_eq!(txn.data_blk_num().unwrap(), 4);
    }

    #[test]
    fn test_wrong_type_accessor_fails() {
        let txn = Transaction::create("PUB".to_string(), sample_data_payload(), 1000);
        let err = txn.req().unwrap_err();
        match err {
            ChainError::WrongTransactionType { field, found } => {
                assert_eq!(field, "req");
                assert_eq!(found, 0);
            }
            other => panic!("Expected WrongTransactionType, got {}", other),
        }
        assert!(txn.group().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        // DATA payload without 'secret'
        let raw = r#"{"payload":{"G":"f7","K":1,"g":"2","g_a":"1a","g_r":"2b","g_r_i":["3c"],"timestamp":7,"type":0},"public_key":"PUB","signature":"SIG"}"#;
        assert!(matches!(
            Transaction::from_json(raw),
            Err(ChainError::MalformedPayload(_))
        ));

        let raw = r#"{"payload":{"timestamp":7,"type":9},"public_key":"PUB","signature":"SIG"}"#;
        assert!(matches!(
            Transaction::from_json(raw),
            Err(ChainError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_out_of_range_type_code_rejected() {
        // 258 is 2 mod 256; it must not be read as an ANSWER.
        let raw = r#"{"payload":{"res":["1a"],"data_blk_num":5,"data_txn_sig":"d","req_blk_num":6,"req_txn_sig":"r","timestamp":7,"type":258},"public_key":"PUB","signature":"SIG"}"#;
        assert!(matches!(
            Transaction::from_json(raw),
            Err(ChainError::MalformedPayload(_))
        ));

        let raw = r#"{"payload":{"res":["1a"],"data_blk_num":5,"data_txn_sig":"d","req_blk_num":6,"req_txn_sig":"r","timestamp":7,"type":256},"public_key":"PUB","signature":"SIG"}"#;
        assert!(matches!(
            Transaction::from_json(raw),
            Err(ChainError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_timestamp_is_past() {
        let now = chrono::Utc::now().timestamp_millis();
        let past = Transaction::create("PUB".to_string(), sample_data_payload(), now - 1000);
        assert!(past.timestamp_is_past());

        let future = Transaction::create("PUB".to_string(), sample_data_payload(), now + 60_000);
        assert!(!future.timestamp_is_past());
    }
}
