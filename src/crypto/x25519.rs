// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie–Hellman (ECDH) key agreement scheme (X25519).
use std::fmt;

use libcrux::ecdh::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

use crate::crypto::sha2::thumbprint;

const ALGORITHM: Algorithm = Algorithm::X25519;

pub const SECRET_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const AGREEMENT_SIZE: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretKey(#[serde(with = "serde_bytes")] [u8; SECRET_KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        // Clamping
        let mut bytes = bytes;
        bytes[0] &= 248u8;
        bytes[31] &= 127u8;
        bytes[31] |= 64u8;
        SecretKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }

    pub fn public_key(&self) -> Result<PublicKey, X25519Error> {
        let bytes = libcrux::ecdh::secret_to_public(ALGORITHM, self.0)
            .map_err(|_| X25519Error::InvalidCurve)?;
        Ok(PublicKey(
            bytes
                .try_into()
                .expect("correct public key size from ecdh method"),
        ))
    }

    /// Computes the 32-byte X25519 shared secret between our secret key and their public key.
    pub fn calculate_agreement(
        &self,
        their_public: &PublicKey,
    ) -> Result<[u8; AGREEMENT_SIZE], X25519Error> {
        let shared_secret = libcrux::ecdh::derive(ALGORITHM, their_public.as_bytes(), self.0)
            .map_err(|_| X25519Error::InvalidCurve)?;
        Ok(shared_secret
            .try_into()
            .expect("correct shared secret size from ecdh method"))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(public_key)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Hex-encoded SHA2-256 digest of the serialized key, the stable identifier of a DH ratchet
    /// step ("step id").
    pub fn thumbprint(&self) -> String {
        thumbprint(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("invalid curve point or scalar")]
    InvalidCurve,
}

#[cfg(test)]
mod tests {
    use crate::engine::CryptoEngine;

    use super::SecretKey;

    #[test]
    fn diffie_hellmann() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let alice_secret_key = SecretKey::from_bytes(engine.random_array().unwrap());
        let alice_public_key = alice_secret_key.public_key().unwrap();

        let bob_secret_key = SecretKey::from_bytes(engine.random_array().unwrap());
        let bob_public_key = bob_secret_key.public_key().unwrap();

        let alice_shared_secret = alice_secret_key
            .calculate_agreement(&bob_public_key)
            .unwrap();
        let bob_shared_secret = bob_secret_key
            .calculate_agreement(&alice_public_key)
            .unwrap();

        assert_eq!(alice_shared_secret, bob_shared_secret);
    }

    #[test]
    fn step_ids_differ_between_keys() {
        let engine = CryptoEngine::from_seed([2; 32]);

        let key_1 = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();
        let key_2 = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        assert_ne!(key_1.thumbprint(), key_2.thumbprint());
    }
}
