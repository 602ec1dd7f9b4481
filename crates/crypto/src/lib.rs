//! Crypto primitives for the stakemesh protocol
//!
//! Every digest on the wire is a lowercase hex SHA-256, every identity is a
//! compressed secp256k1 public key in hex, and every signature is a DER-hex
//! ECDSA signature over a 32-byte digest.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Crypto errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid digest length: expected 32 bytes, got {0}")]
    InvalidDigestLength(usize),

    #[error("signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// SHA-256 of a string, as lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// A secp256k1 keypair used to sign transactions and gossip envelopes.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Load a keypair from a hex-encoded 32-byte secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let secret_hex = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let bytes = hex::decode(secret_hex)?;
        let signing =
            SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing })
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    /// Hex of the 32-byte secret key.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Compressed SEC1 public key as hex (66 chars).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_encoded_point(true).as_bytes())
    }

    /// Sign a hex-encoded 32-byte digest, returning the DER signature as hex.
    ///
    /// Signing is deterministic (RFC 6979), so the same digest always yields
    /// the same signature bytes.
    pub fn sign_digest_hex(&self, digest_hex: &str) -> Result<String> {
        let digest = decode_digest(digest_hex)?;
        let signature: Signature = self
            .signing
            .sign_prehash(&digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(hex::encode(signature.to_der().as_bytes()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify a DER-hex signature over a hex digest under a compressed pubkey.
///
/// Malformed keys, digests, or signatures verify as `false` rather than
/// erroring; gossip handlers drop bad envelopes without distinguishing why.
pub fn verify_digest_hex(public_key_hex: &str, digest_hex: &str, signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_sec1_bytes(&key_bytes) else {
        return false;
    };
    let Ok(digest) = decode_digest(digest_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(&sig_bytes) else {
        return false;
    };
    verifying.verify_prehash(&digest, &signature).is_ok()
}

fn decode_digest(digest_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(digest_hex)?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidDigestLength(bytes.len()));
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}
