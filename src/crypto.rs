//! Cryptographic primitives for Chainge
//!
//! Transactions are signed with RSA-SHA256 (PKCS#1 v1.5) over their
//! canonical payload string; keys travel as PKCS#8 PEM text inside the
//! transactions themselves. The off-chain identity blob is wrapped with
//! plain PKCS#1 v1.5 encryption under the owner's public key.

use crate::error::ChainError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Default RSA modulus size in bits.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Hex digest of SHA-256 over a string. All chain hashes (merkle rows,
/// block hashes, identity hashes) go through this.
pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
}

impl KeyPair {
    /// Generates a new random RSA key pair using the OS random number generator.
    pub fn generate(bits: usize) -> Result<Self, ChainError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| ChainError::CryptoError(format!("RSA key generation failed: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    /// Imports a key pair from a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, ChainError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| ChainError::CryptoError(format!("Invalid private key PEM: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    /// PKCS#8 PEM encoding of the public key. This is the string that is
    /// embedded in transactions as `public_key`.
    pub fn public_key_pem(&self) -> Result<String, ChainError> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ChainError::CryptoError(format!("Failed to encode public key: {}", e)))
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn private_key_pem(&self) -> Result<String, ChainError> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ChainError::CryptoError(format!("Failed to encode private key: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Signs a message with RSA-SHA256 and returns the hex signature.
    pub fn sign(&self, message: &str) -> String {
        sign_message(&self.private_key, message)
    }
}

/// RSA-SHA256 signature over `message`, hex encoded.
pub fn sign_message(private_key: &RsaPrivateKey, message: &str) -> String {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key.sign(message.as_bytes());
    hex::encode(signature.to_bytes())
}

/// Verifies an RSA-SHA256 signature given the PEM public key, the message,
/// and the hex signature. Returns `Ok(false)` for a well-formed signature
/// that does not match; `Err` for inputs that cannot be parsed at all.
pub fn verify_signature(
    public_key_pem: &str,
    message: &str,
    signature_hex: &str,
) -> Result<bool, ChainError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key PEM: {}", e)))?;
    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature hex: {}", e)))?;
    let signature = match Signature::try_from(signature_bytes.as_slice()) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    Ok(verifying_key.verify(message.as_bytes(), &signature).is_ok())
}

/// Encrypts `data` under `public_key` (PKCS#1 v1.5) and base64-encodes the
/// result. Used for the off-chain `encrypted`/`encrypted_key` blobs of a
/// DATA transaction.
pub fn encrypt_for(public_key: &RsaPublicKey, data: &[u8]) -> Result<String, ChainError> {
    let ciphertext = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .map_err(|e| ChainError::CryptoError(format!("RSA encryption failed: {}", e)))?;
    Ok(BASE64.encode(ciphertext))
}

/// Reverses [`encrypt_for`].
pub fn decrypt_with(private_key: &RsaPrivateKey, data_b64: &str) -> Result<Vec<u8>, ChainError> {
    let ciphertext = BASE64
        .decode(data_b64)
        .map_err(|e| ChainError::CryptoError(format!("Invalid base64 ciphertext: {}", e)))?;
    private_key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|e| ChainError::CryptoError(format!("RSA decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024-bit keys keep the test suite fast; production uses 2048.
    const TEST_BITS: usize = 1024;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate(TEST_BITS).unwrap();
        let message = "canonical payload bytes";

        let signature = keypair.sign(message);
        let pem = keypair.public_key_pem().unwrap();

        assert!(verify_signature(&pem, message, &signature).unwrap());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let keypair = KeyPair::generate(TEST_BITS).unwrap();
        let signature = keypair.sign("original");
        let pem = keypair.public_key_pem().unwrap();

        assert!(!verify_signature(&pem, "tampered", &signature).unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let keypair1 = KeyPair::generate(TEST_BITS).unwrap();
        let keypair2 = KeyPair::generate(TEST_BITS).unwrap();

        let signature = keypair1.sign("message");
        let pem2 = keypair2.public_key_pem().unwrap();

        assert!(!verify_signature(&pem2, "message", &signature).unwrap());
    }

    #[test]
    fn test_invalid_inputs_error() {
        assert!(verify_signature("not a pem", "m", "00ff").is_err());

        let keypair = KeyPair::generate(TEST_BITS).unwrap();
        let pem = keypair.public_key_pem().unwrap();
        assert!(verify_signature(&pem, "m", "zzzz").is_err());
    }

    #[test]
    fn test_pem_round_trip() {
        let keypair = KeyPair::generate(TEST_BITS).unwrap();
        let pem = keypair.private_key_pem().unwrap();
        let restored = KeyPair::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(keypair.public_key, restored.public_key);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let keypair = KeyPair::generate(TEST_BITS).unwrap();
        let blob = encrypt_for(&keypair.public_key, b"alice@example.edu").unwrap();
        let plain = decrypt_with(&keypair.private_key, &blob).unwrap();
        assert_eq!(plain, b"alice@example.edu");
    }
}
