//! Error types for Chainge

use std::fmt;

#[derive(Debug, Clone)]
pub enum ChainError {
    MalformedPayload(String),
    WrongTransactionType { field: &'static str, found: u8 },
    SignatureVerification(String),
    BlockIntegrity(String),
    DifficultyNotSatisfied { difficulty: u32 },
    UnresolvedReference(String),
    InvalidInput(String),
    CryptoError(String),
    DatabaseError(String),
    SerializationError(String),
    NetworkError(String),
    IoError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::MalformedPayload(msg) => write!(f, "Malformed payload: {}", msg),
            ChainError::WrongTransactionType { field, found } => write!(
                f,
                "Field '{}' is not present on a transaction of type {}",
                field, found
            ),
            ChainError::SignatureVerification(msg) => {
                write!(f, "Signature verification failed: {}", msg)
            }
            ChainError::BlockIntegrity(msg) => write!(f, "Block integrity error: {}", msg),
            ChainError::DifficultyNotSatisfied { difficulty } => {
                write!(f, "Block hash does not satisfy difficulty {}", difficulty)
            }
            ChainError::UnresolvedReference(msg) => write!(f, "Unresolved reference: {}", msg),
            ChainError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
