// SPDX-License-Identifier: MIT OR Apache-2.0

//! DH ratchet steps and the bounded step ring.
//!
//! A step captures one DH ratchet epoch: the peer's ratchet public key (identified by its
//! thumbprint), an optional sending chain, an optional receiving chain and the highest counter
//! decrypted so far. The ring keeps at most `capacity` steps, evicting the oldest on overflow.
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::crypto::hkdf::{HkdfError, hkdf_blocks};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::ratchet::chain::ChainKey;
use crate::x3dh::ROOT_KEY_SIZE;

const RATCHET_INFO: &[u8] = b"WhisperRatchet";

/// Hex thumbprint of a peer ratchet public key, the stable identifier of a DH step.
pub type StepId = String;

/// One DH ratchet epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhStep {
    step_id: StepId,
    remote_key: PublicKey,
    sending: Option<ChainKey>,
    receiving: Option<ChainKey>,
    last_decrypted: Option<u32>,
}

impl DhStep {
    pub fn new(remote_key: PublicKey) -> Self {
        Self {
            step_id: remote_key.thumbprint(),
            remote_key,
            sending: None,
            receiving: None,
            last_decrypted: None,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn remote_key(&self) -> &PublicKey {
        &self.remote_key
    }

    pub fn sending(&self) -> Option<&ChainKey> {
        self.sending.as_ref()
    }

    pub fn sending_mut(&mut self) -> Option<&mut ChainKey> {
        self.sending.as_mut()
    }

    pub fn set_sending(&mut self, chain: ChainKey) {
        self.sending = Some(chain);
    }

    pub fn receiving(&self) -> Option<&ChainKey> {
        self.receiving.as_ref()
    }

    pub fn set_receiving(&mut self, chain: ChainKey) {
        self.receiving = Some(chain);
    }

    /// Highest message counter decrypted within this step so far.
    pub fn last_decrypted(&self) -> Option<u32> {
        self.last_decrypted
    }

    pub fn mark_decrypted(&mut self, counter: u32) {
        self.last_decrypted = Some(match self.last_decrypted {
            Some(last) => last.max(counter),
            None => counter,
        });
    }
}

/// Derives the next chain from a DH agreement, replacing the root key in place.
///
/// Both endpoints run the same derivation with the current root key as HKDF salt, so the values
/// converge: `X25519(a, B) = X25519(b, A)`.
pub(crate) fn derive_chain(
    root_key: &mut Secret<ROOT_KEY_SIZE>,
    our_secret: &SecretKey,
    their_public: &PublicKey,
) -> Result<ChainKey, StepError> {
    let agreement = our_secret.calculate_agreement(their_public)?;
    let [next_root, chain] =
        hkdf_blocks::<2>(&agreement, Some(root_key.as_bytes()), RATCHET_INFO)?;

    *root_key = Secret::from_bytes(next_root);
    Ok(ChainKey::new(Secret::from_bytes(chain)))
}

/// Bounded, ordered ring of DH steps with a hash index by step id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRing {
    order: VecDeque<StepId>,
    steps: HashMap<StepId, DhStep>,
    capacity: usize,
}

impl StepRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            steps: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    pub fn get_mut(&mut self, step_id: &str) -> Option<&mut DhStep> {
        self.steps.get_mut(step_id)
    }

    /// The most recently pushed step, which drives the sending side.
    pub fn current_mut(&mut self) -> Option<&mut DhStep> {
        let step_id = self.order.back()?.clone();
        self.steps.get_mut(&step_id)
    }

    /// Appends a step, evicting the oldest one when the ring is full. Returns the id of the
    /// evicted step so callers can drop its skipped keys too.
    pub fn push(&mut self, step: DhStep) -> Option<StepId> {
        let mut evicted = None;
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.steps.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        let step_id = step.step_id().to_owned();
        self.order.push_back(step_id.clone());
        self.steps.insert(step_id, step);
        evicted
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    X25519(#[from] X25519Error),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Secret;
    use crate::crypto::x25519::SecretKey;
    use crate::engine::CryptoEngine;

    use super::{DhStep, StepRing, derive_chain};

    #[test]
    fn chain_derivation_converges_on_both_endpoints() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let our_secret = SecretKey::from_bytes(engine.random_array().unwrap());
        let their_secret = SecretKey::from_bytes(engine.random_array().unwrap());
        let our_public = our_secret.public_key().unwrap();
        let their_public = their_secret.public_key().unwrap();

        let mut our_root = Secret::from_bytes([9; 32]);
        let mut their_root = Secret::from_bytes([9; 32]);

        let our_chain = derive_chain(&mut our_root, &our_secret, &their_public).unwrap();
        let their_chain = derive_chain(&mut their_root, &their_secret, &our_public).unwrap();

        assert_eq!(our_root, their_root);

        // Identical chains produce identical message keys.
        let mut our_chain = our_chain;
        let mut their_chain = their_chain;
        assert_eq!(
            our_chain.advance().into_secret(),
            their_chain.advance().into_secret()
        );
    }

    #[test]
    fn derivation_replaces_the_root_key() {
        let engine = CryptoEngine::from_seed([2; 32]);

        let our_secret = SecretKey::from_bytes(engine.random_array().unwrap());
        let their_public = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        let mut root = Secret::from_bytes([9; 32]);
        derive_chain(&mut root, &our_secret, &their_public).unwrap();
        assert_ne!(root, Secret::from_bytes([9; 32]));
    }

    #[test]
    fn ring_evicts_oldest_step_on_overflow() {
        let engine = CryptoEngine::from_seed([3; 32]);
        let mut ring = StepRing::new(2);

        let keys: Vec<_> = (0..3)
            .map(|_| {
                SecretKey::from_bytes(engine.random_array().unwrap())
                    .public_key()
                    .unwrap()
            })
            .collect();

        assert_eq!(ring.push(DhStep::new(keys[0])), None);
        assert_eq!(ring.push(DhStep::new(keys[1])), None);
        let evicted = ring.push(DhStep::new(keys[2]));

        assert_eq!(evicted, Some(keys[0].thumbprint()));
        assert_eq!(ring.len(), 2);
        assert!(!ring.contains(&keys[0].thumbprint()));
        assert!(ring.contains(&keys[1].thumbprint()));

        // Current step is the latest pushed.
        assert_eq!(
            ring.current_mut().unwrap().step_id(),
            keys[2].thumbprint().as_str()
        );
    }

    #[test]
    fn mark_decrypted_keeps_the_maximum() {
        let engine = CryptoEngine::from_seed([4; 32]);
        let key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        let mut step = DhStep::new(key);
        assert_eq!(step.last_decrypted(), None);

        step.mark_decrypted(4);
        step.mark_decrypted(2);
        assert_eq!(step.last_decrypted(), Some(4));
    }
}
