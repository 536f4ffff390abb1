// SPDX-License-Identifier: MIT OR Apache-2.0

//! Edwards-Curve Digital Signature Algorithm (EdDSA) related to Curve25519 using SHA-512.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

pub const SIGNING_KEY_SIZE: usize = 32;
pub const VERIFYING_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 secret key in 32-byte seed form.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SigningKey(#[serde(with = "serde_bytes")] [u8; SIGNING_KEY_SIZE]);

impl SigningKey {
    pub fn from_bytes(bytes: [u8; SIGNING_KEY_SIZE]) -> Self {
        SigningKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNING_KEY_SIZE] {
        &self.0
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        let mut bytes = [0u8; VERIFYING_KEY_SIZE];
        libcrux_ed25519::secret_to_public(&mut bytes, &self.0);
        VerifyingKey(bytes)
    }

    pub fn sign(&self, bytes: &[u8]) -> Result<Signature, SignatureError> {
        let bytes =
            libcrux_ed25519::sign(bytes, &self.0).map_err(|_| SignatureError::SigningFailed)?;
        Ok(Signature(bytes))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal the seed when printing debug info.
        f.debug_struct("SigningKey").field("value", &"***").finish()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey(#[serde(with = "serde_bytes")] [u8; VERIFYING_KEY_SIZE]);

impl VerifyingKey {
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; VERIFYING_KEY_SIZE] {
        self.0
    }

    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        libcrux_ed25519::verify(bytes, &self.0, &signature.0)
            .map_err(|_| SignatureError::VerificationFailed)?;
        Ok(())
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature does not match public key and payload")]
    VerificationFailed,

    #[error("could not sign payload")]
    SigningFailed,
}

#[cfg(test)]
mod tests {
    use crate::engine::CryptoEngine;

    use super::{SignatureError, SigningKey};

    #[test]
    fn sign_and_verify() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let signing_key = SigningKey::from_bytes(engine.random_array().unwrap());
        let verifying_key = signing_key.verifying_key();

        let signature = signing_key.sign(b"identity binding").unwrap();
        assert!(verifying_key.verify(b"identity binding", &signature).is_ok());
    }

    #[test]
    fn failed_verify() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let signing_key = SigningKey::from_bytes(engine.random_array().unwrap());
        let verifying_key = signing_key.verifying_key();
        let signature = signing_key.sign(b"identity binding").unwrap();

        let other_signing_key = SigningKey::from_bytes(engine.random_array().unwrap());
        let other_verifying_key = other_signing_key.verifying_key();

        assert!(matches!(
            verifying_key.verify(b"tampered payload", &signature),
            Err(SignatureError::VerificationFailed)
        ));
        assert!(matches!(
            other_verifying_key.verify(b"identity binding", &signature),
            Err(SignatureError::VerificationFailed)
        ));
    }
}
