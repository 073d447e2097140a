//! Cryptographic primitives for Attest: BLAKE3 digests with domain
//! separation, Ed25519 key pairs and detached signatures.
//!
//! Digests and signatures travel as hex strings at the API boundary so
//! they can be embedded directly into audit records.

#![deny(unsafe_code)]

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors from digest or signature handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex length: {0} (expected {1})")]
    InvalidLength(usize, usize),

    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("invalid public key bytes")]
    InvalidKey,

    #[error("signature verification failed")]
    BadSignature,
}

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Hash `bytes` under a domain-separation prefix. Callers use one
    /// prefix per record kind so digests from different contexts can
    /// never collide.
    pub fn compute(domain: &str, bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(bytes);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        if s.len() != 64 {
            return Err(CryptoError::InvalidLength(s.len(), 64));
        }
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Digest::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// A detached Ed25519 signature together with the signer's public key,
/// both hex-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignature {
    pub signature: String,
    pub public_key: String,
}

impl DetachedSignature {
    /// Verify this signature over `message`.
    pub fn verify(&self, message: &[u8]) -> Result<(), CryptoError> {
        let sig_bytes = hex::decode(&self.signature).map_err(|_| CryptoError::InvalidHex)?;
        let pk_bytes = hex::decode(&self.public_key).map_err(|_| CryptoError::InvalidHex)?;

        let sig_array: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(sig_bytes.len(), 64))?;
        let pk_array: [u8; 32] = pk_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(pk_bytes.len(), 32))?;

        let signature = Signature::from_bytes(&sig_array);
        let verifying_key =
            VerifyingKey::from_bytes(&pk_array).map_err(|_| CryptoError::InvalidKey)?;

        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

/// An Ed25519 signing identity. The secret key is zeroized on drop by
/// the underlying `SigningKey`.
pub struct SigningIdentity {
    key: SigningKey,
    key_id: String,
}

impl SigningIdentity {
    /// Generate a fresh random identity.
    pub fn generate(key_id: impl Into<String>) -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            key: SigningKey::generate(&mut rng),
            key_id: key_id.into(),
        }
    }

    /// Rebuild an identity from a 32-byte seed.
    pub fn from_seed(key_id: impl Into<String>, seed: [u8; 32]) -> Self {
        let seed = Zeroizing::new(seed);
        Self {
            key: SigningKey::from_bytes(&seed),
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    /// Sign `message`, returning a detached signature.
    pub fn sign(&self, message: &[u8]) -> DetachedSignature {
        let signature = self.key.sign(message);
        DetachedSignature {
            signature: hex::encode(signature.to_bytes()),
            public_key: self.public_key_hex(),
        }
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose key material in debug output.
        write!(f, "SigningIdentity({})", self.key_id)
    }
}
