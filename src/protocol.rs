//! Identity commitment, challenge and response.
//!
//! The owner of an identity publishes a DATA transaction committing to
//! `secret = H(identity) + g^r mod G` (plain big-integer addition, never
//! reduced) together with DH parameters and K auxiliary commitments
//! `g^{r_i}`. A challenger who believes the identity is `M'` posts a
//! REQUEST carrying a fresh `g^b` and the product
//! `(g^{g^{ab}} mod G) * (secret - H(M'))`, plus a K-bit string selecting
//! which auxiliary secrets to disclose. The owner replies with an ANSWER
//! revealing `r_i` for bit 0 and `r_i + g^{ab} + r` for bit 1.
//!
//! All big integers travel as lowercase hex; the challenge product is the
//! only signed quantity (it goes negative when `H(M') > secret`).

use crate::crypto::{self, sha256_hex, KeyPair};
use crate::error::{ChainError, Result};
use crate::transaction::{AnswerPayload, DataPayload, Payload, RequestPayload, Transaction};
use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::{BigInt, BigUint, RandBigInt, RandPrime, ToBigInt};
use rand::rngs::OsRng;
use rand::Rng;

/// Default DH modulus size in bits. Kept small for now; a deployment
/// against adversarial challengers wants 2048.
pub const DEFAULT_DH_BITS: usize = 128;

/// Default number of auxiliary secrets per DATA transaction.
pub const DEFAULT_K: usize = 3;

/// Miller-Rabin rounds when screening the safe-prime candidate.
const PRIME_ROUNDS: usize = 20;

pub fn biguint_from_hex(hex: &str) -> Result<BigUint> {
    BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| ChainError::InvalidInput(format!("Invalid hex integer '{}'", hex)))
}

pub fn bigint_from_hex(hex: &str) -> Result<BigInt> {
    BigInt::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| ChainError::InvalidInput(format!("Invalid hex integer '{}'", hex)))
}

pub fn to_hex(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// SHA-256 of `identity`, interpreted as a big integer.
pub fn hash_to_int(identity: &str) -> BigUint {
    // The digest is valid hex by construction.
    BigUint::parse_bytes(sha256_hex(identity).as_bytes(), 16).unwrap_or_default()
}

/// A Diffie-Hellman group: safe prime modulus with generator 2.
#[derive(Debug, Clone, PartialEq)]
pub struct DhGroup {
    pub prime: BigUint,
    pub generator: BigUint,
}

impl DhGroup {
    /// Generate a fresh group: find q prime with p = 2q + 1 also prime.
    pub fn generate(bits: usize) -> Self {
        let mut rng = OsRng;
        loop {
            let q: BigUint = rng.gen_prime(bits - 1);
            let p: BigUint = (&q << 1) + BigUint::from(1u32);
            if probably_prime(&p, PRIME_ROUNDS) {
                return DhGroup {
                    prime: p,
                    generator: BigUint::from(2u32),
                };
            }
        }
    }

    pub fn from_hex(prime_hex: &str, generator_hex: &str) -> Result<Self> {
        Ok(DhGroup {
            prime: biguint_from_hex(prime_hex)?,
            generator: biguint_from_hex(generator_hex)?,
        })
    }

    /// Uniform exponent in `[1, prime - 1)`.
    pub fn random_exponent(&self) -> BigUint {
        let low = BigUint::from(1u32);
        let high = &self.prime - BigUint::from(1u32);
        OsRng.gen_biguint_range(&low, &high)
    }

    /// `generator ^ exponent mod prime`.
    pub fn pow(&self, exponent: &BigUint) -> BigUint {
        self.generator.modpow(exponent, &self.prime)
    }
}

/// Exponents the owner must retain to answer future challenges. These
/// never leave the owner's ledger.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnerSecrets {
    /// Blinding exponent of `secret`.
    pub r: String,
    /// Long-lived DH exponent behind `g_a`.
    pub a: String,
    /// Auxiliary secrets behind `g_r_i`.
    pub r_i: Vec<String>,
}

pub struct DataTxnBundle {
    pub txn: Transaction,
    pub serialized: String,
    pub secrets: OwnerSecrets,
}

pub struct RequestTxnBundle {
    pub txn: Transaction,
    pub serialized: String,
    /// Challenger's DH exponent, retained for answer verification.
    pub b: String,
}

pub struct AnswerTxnBundle {
    pub txn: Transaction,
    pub serialized: String,
}

/// Build and sign a DATA transaction committing to `identity` under
/// `id_key` (e.g. "email"). The identity and its key are additionally
/// RSA-wrapped under the owner's public key for off-chain storage.
pub fn create_data_txn(
    keypair: &KeyPair,
    id_key: &str,
    identity: &str,
    k: usize,
    dh_bits: usize,
) -> Result<DataTxnBundle> {
    if k == 0 {
        return Err(ChainError::InvalidInput(
            "K must be at least 1".to_string(),
        ));
    }

    let group = DhGroup::generate(dh_bits);

    let a = group.random_exponent();
    let g_a = group.pow(&a);
    let r = group.random_exponent();
    let g_r = group.pow(&r);

    let mut r_i = Vec::with_capacity(k);
    let mut g_r_i = Vec::with_capacity(k);
    for _ in 0..k {
        let x = group.random_exponent();
        g_r_i.push(to_hex(&group.pow(&x)));
        r_i.push(to_hex(&x));
    }

    // Unreduced on purpose; the challenge side subtracts H back out.
    let secret = hash_to_int(identity) + &g_r;

    let payload = Payload::Data(DataPayload {
        group: to_hex(&group.prime),
        g: to_hex(&group.generator),
        g_a: to_hex(&g_a),
        g_r: to_hex(&g_r),
        k,
        secret: to_hex(&secret),
        g_r_i,
        encrypted: Some(crypto::encrypt_for(&keypair.public_key, identity.as_bytes())?),
        encrypted_key: Some(crypto::encrypt_for(&keypair.public_key, id_key.as_bytes())?),
    });

    let mut txn = Transaction::create(
        keypair.public_key_pem()?,
        payload,
        chrono::Utc::now().timestamp_millis(),
    );
    txn.sign(&keypair.private_key)?;
    let serialized = txn.serialize()?;

    Ok(DataTxnBundle {
        txn,
        serialized,
        secrets: OwnerSecrets {
            r: to_hex(&r),
            a: to_hex(&a),
            r_i,
        },
    })
}

/// Build and sign a REQUEST challenging `data_txn` on the guess that its
/// committed identity is `asking_identity`. `data_blk_num` locates the
/// DATA transaction on chain.
pub fn create_request_txn(
    keypair: &KeyPair,
    data_txn: &Transaction,
    data_blk_num: u64,
    asking_identity: &str,
) -> Result<RequestTxnBundle> {
    let group = DhGroup::from_hex(data_txn.group()?, data_txn.generator()?)?;
    let g_a = biguint_from_hex(data_txn.g_a()?)?;
    let secret = biguint_from_hex(data_txn.secret()?)?;

    let b = group.random_exponent();
    let g_b = group.pow(&b);
    let g_ab = g_a.modpow(&b, &group.prime);

    let challenge = challenge_product(&group, &g_ab, &secret, asking_identity);

    let k = data_txn.k()?;
    let mut req = String::with_capacity(k);
    let mut rng = OsRng;
    for _ in 0..k {
        req.push(if rng.gen_bool(0.5) { '1' } else { '0' });
    }

    let payload = Payload::Request(RequestPayload {
        g_b: to_hex(&g_b),
        g_g_ab_p_r: challenge.to_str_radix(16),
        req,
        data_blk_num,
        data_txn_sig: data_txn.signature.clone(),
    });

    let mut txn = Transaction::create(
        keypair.public_key_pem()?,
        payload,
        chrono::Utc::now().timestamp_millis(),
    );
    txn.sign(&keypair.private_key)?;
    let serialized = txn.serialize()?;

    Ok(RequestTxnBundle {
        txn,
        serialized,
        b: to_hex(&b),
    })
}

/// `(g^{g_ab} mod G) * (secret - H(identity))`. Signed, never reduced.
fn challenge_product(group: &DhGroup, g_ab: &BigUint, secret: &BigUint, identity: &str) -> BigInt {
    let outer = group.pow(g_ab).to_bigint().unwrap_or_default();
    let diff = secret.to_bigint().unwrap_or_default()
        - hash_to_int(identity).to_bigint().unwrap_or_default();
    outer * diff
}

/// Build and sign an ANSWER disclosing the values selected by
/// `req_txn.req`: bit 0 reveals `r_i`, bit 1 reveals `r_i + g^{ab} + r`.
pub fn create_answer_txn(
    keypair: &KeyPair,
    data_txn: &Transaction,
    req_txn: &Transaction,
    req_blk_num: u64,
    secrets: &OwnerSecrets,
) -> Result<AnswerTxnBundle> {
    let group = DhGroup::from_hex(data_txn.group()?, data_txn.generator()?)?;
    let g_b = biguint_from_hex(req_txn.g_b()?)?;
    let a = biguint_from_hex(&secrets.a)?;
    let r = biguint_from_hex(&secrets.r)?;
    let g_ab = g_b.modpow(&a, &group.prime);

    let req = req_txn.req()?;
    if req.len() != secrets.r_i.len() {
        return Err(ChainError::InvalidInput(format!(
            "Challenge has {} bits but {} auxiliary secrets are retained",
            req.len(),
            secrets.r_i.len()
        )));
    }

    let mut res = Vec::with_capacity(req.len());
    for (bit, r_i_hex) in req.chars().zip(&secrets.r_i) {
        let r_i = biguint_from_hex(r_i_hex)?;
        match bit {
            '0' => res.push(to_hex(&r_i)),
            '1' => res.push(to_hex(&(r_i + &g_ab + &r))),
            other => {
                return Err(ChainError::MalformedPayload(format!(
                    "Challenge bit '{}' is not 0 or 1",
                    other
                )))
            }
        }
    }

    let payload = Payload::Answer(AnswerPayload {
        res,
        data_blk_num: req_txn.data_blk_num()?,
        data_txn_sig: req_txn.data_txn_sig()?.to_string(),
        req_blk_num,
        req_txn_sig: req_txn.signature.clone(),
    });

    let mut txn = Transaction::create(
        keypair.public_key_pem()?,
        payload,
        chrono::Utc::now().timestamp_millis(),
    );
    txn.sign(&keypair.private_key)?;
    let serialized = txn.serialize()?;

    Ok(AnswerTxnBundle { txn, serialized })
}

/// Challenger-side check of an ANSWER.
///
/// With the retained exponent `b` the challenger recomputes the shared
/// secret and checks
///   1. the posted challenge really equals
///      `(g^{g_ab} mod G) * (secret - H(asked identity))`, and
///   2. every revealed value is consistent with the commitments:
///      bit 0: `g^{res_i} == g_r_i[i] (mod G)`;
///      bit 1: `g^{res_i} == g_r_i[i] * g^{g_ab} * g_r (mod G)`.
///
/// Both identities hold exactly when the owner answered with the exponents
/// behind its published commitments. Returns `Ok(false)` on any mismatch.
pub fn verify_answer_txn(
    data_txn: &Transaction,
    req_txn: &Transaction,
    ans_txn: &Transaction,
    b_hex: &str,
    asked_identity: &str,
) -> Result<bool> {
    let group = DhGroup::from_hex(data_txn.group()?, data_txn.generator()?)?;
    let g_a = biguint_from_hex(data_txn.g_a()?)?;
    let g_r = biguint_from_hex(data_txn.g_r()?)?;
    let secret = biguint_from_hex(data_txn.secret()?)?;
    let g_r_i = data_txn.g_r_i()?;

    let b = biguint_from_hex(b_hex)?;
    let g_ab = g_a.modpow(&b, &group.prime);

    let expected_challenge = challenge_product(&group, &g_ab, &secret, asked_identity);
    if bigint_from_hex(req_txn.challenge()?)? != expected_challenge {
        return Ok(false);
    }

    let req = req_txn.req()?;
    let res = ans_txn.res()?;
    if res.len() != req.len() || req.len() != g_r_i.len() || req.len() != data_txn.k()? {
        return Ok(false);
    }

    let g_g_ab = group.pow(&g_ab);
    for ((bit, res_hex), commitment_hex) in req.chars().zip(res).zip(g_r_i) {
        let revealed = group.pow(&biguint_from_hex(res_hex)?);
        let commitment = biguint_from_hex(commitment_hex)?;
        let expected = match bit {
            '0' => commitment % &group.prime,
            '1' => commitment * &g_g_ab % &group.prime * &g_r % &group.prime,
            _ => return Ok(false),
        };
        if revealed != expected {
            return Ok(false);
        }
    }

    Ok(true)
}
