// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forward-secure symmetric chain.
//!
//! A chain key advances one-way via HMAC: each step emits a message-key precursor
//! (`HMAC(CK, 0x01)`) and replaces the chain key with its successor (`HMAC(CK, 0x02)`), stepping
//! the counter by one. The precursor expands into the per-message AEAD key, HMAC key and nonce.
use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::crypto::aead::AeadNonce;
use crate::crypto::hkdf::{HkdfError, hkdf_blocks};
use crate::crypto::hmac::hmac_sha256;

pub const CHAIN_KEY_SIZE: usize = 32;

const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_SEED: [u8; 1] = [0x02];

const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

/// Sending or receiving half of the symmetric ratchet within one DH step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainKey {
    key: Secret<CHAIN_KEY_SIZE>,
    counter: u32,
}

impl ChainKey {
    pub(crate) fn new(key: Secret<CHAIN_KEY_SIZE>) -> Self {
        Self { key, counter: 0 }
    }

    /// Number of advances performed so far; the next emitted message key carries this counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Steps the chain: emits the message-key precursor for the current counter and replaces
    /// the chain key with its one-way successor.
    pub(crate) fn advance(&mut self) -> MessageKeySeed {
        let seed = hmac_sha256(self.key.as_bytes(), &[&MESSAGE_KEY_SEED]);
        let successor = hmac_sha256(self.key.as_bytes(), &[&CHAIN_KEY_SEED]);

        self.key = Secret::from_bytes(successor);
        let counter = self.counter;
        self.counter += 1;

        MessageKeySeed {
            seed: Secret::from_bytes(seed),
            counter,
        }
    }
}

/// Message-key precursor emitted by one chain step. This is the value cached for skipped
/// counters; the actual AEAD material is expanded on use.
#[derive(Debug)]
pub(crate) struct MessageKeySeed {
    seed: Secret<CHAIN_KEY_SIZE>,
    counter: u32,
}

impl MessageKeySeed {
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn from_secret(seed: Secret<CHAIN_KEY_SIZE>, counter: u32) -> Self {
        Self { seed, counter }
    }

    pub fn into_secret(self) -> Secret<CHAIN_KEY_SIZE> {
        self.seed
    }

    /// Expands the precursor into three independent 32-byte blocks: AEAD key, HMAC key and the
    /// block whose first 12 bytes become the AEAD nonce.
    pub fn derive_message_keys(&self) -> Result<MessageKeys, HkdfError> {
        let [cipher_key, mac_key, nonce_block] =
            hkdf_blocks::<3>(self.seed.as_bytes(), None, MESSAGE_KEYS_INFO)?;

        let mut nonce: AeadNonce = [0; 12];
        nonce.copy_from_slice(&nonce_block[..12]);

        Ok(MessageKeys {
            cipher_key: Secret::from_bytes(cipher_key),
            mac_key: Secret::from_bytes(mac_key),
            nonce,
        })
    }
}

/// Per-message AEAD material. Lives only for the duration of one encrypt or decrypt call.
#[derive(Debug)]
pub(crate) struct MessageKeys {
    cipher_key: Secret<32>,
    mac_key: Secret<32>,
    nonce: AeadNonce,
}

impl MessageKeys {
    pub fn cipher_key(&self) -> &[u8; 32] {
        self.cipher_key.as_bytes()
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        self.mac_key.as_bytes()
    }

    pub fn nonce(&self) -> AeadNonce {
        self.nonce
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Secret;

    use super::ChainKey;

    #[test]
    fn advance_steps_counter_and_changes_keys() {
        let mut chain = ChainKey::new(Secret::from_bytes([1; 32]));
        assert_eq!(chain.counter(), 0);

        let seed_0 = chain.advance();
        let seed_1 = chain.advance();

        assert_eq!(seed_0.counter(), 0);
        assert_eq!(seed_1.counter(), 1);
        assert_eq!(chain.counter(), 2);
        assert_ne!(seed_0.into_secret(), seed_1.into_secret());
    }

    #[test]
    fn same_chain_key_produces_same_sequence() {
        let mut chain_1 = ChainKey::new(Secret::from_bytes([7; 32]));
        let mut chain_2 = ChainKey::new(Secret::from_bytes([7; 32]));

        for _ in 0..8 {
            let seed_1 = chain_1.advance();
            let seed_2 = chain_2.advance();
            assert_eq!(seed_1.into_secret(), seed_2.into_secret());
        }
    }

    #[test]
    fn message_keys_are_independent_blocks() {
        let mut chain = ChainKey::new(Secret::from_bytes([3; 32]));
        let keys = chain.advance().derive_message_keys().unwrap();

        assert_ne!(keys.cipher_key(), keys.mac_key());
        assert_ne!(keys.nonce().as_slice(), &keys.cipher_key()[..12]);
    }
}
