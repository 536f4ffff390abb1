// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide crypto engine: secure random source plus hashing entry point.
//!
//! The engine is injected into identities and sessions. Applications typically install one engine
//! for the whole process with [`CryptoEngine::install`] and fetch it wherever a session is
//! created:
//!
//! ```ignore
//! CryptoEngine::install(CryptoEngine::default())?;
//! let engine = CryptoEngine::global()?;
//! ```
//!
//! The global slot is write-once: installing a second engine is a configuration error, not a
//! replacement. Tests bypass the global slot entirely and inject seeded engines for
//! deterministic key material.
use std::sync::{Arc, Mutex, OnceLock};

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

use crate::crypto::sha2::{SHA256_DIGEST_SIZE, sha2_256};

static GLOBAL_ENGINE: OnceLock<Arc<CryptoEngine>> = OnceLock::new();

/// Cryptographically-secure random number generator (ChaCha20 stream cipher, seeded via the
/// operating system) together with the SHA2-256 hashing entry point.
#[derive(Debug)]
pub struct CryptoEngine {
    rng: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl CryptoEngine {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl CryptoEngine {
    /// Installs the process-wide engine. The slot is write-once; a second call is rejected.
    pub fn install(engine: CryptoEngine) -> Result<(), EngineError> {
        GLOBAL_ENGINE
            .set(Arc::new(engine))
            .map_err(|_| EngineError::AlreadyInstalled)
    }

    /// Returns the installed process-wide engine.
    pub fn global() -> Result<Arc<CryptoEngine>, EngineError> {
        GLOBAL_ENGINE
            .get()
            .cloned()
            .ok_or(EngineError::Unavailable)
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], EngineError> {
        let mut rng = self.rng.lock().map_err(|_| EngineError::LockPoisoned)?;
        let mut out = [0u8; N];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| EngineError::NotEnoughRandomness)?;
        Ok(out)
    }

    pub fn random_vec(&self, len: usize) -> Result<Vec<u8>, EngineError> {
        let mut rng = self.rng.lock().map_err(|_| EngineError::LockPoisoned)?;
        let mut out = vec![0u8; len];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| EngineError::NotEnoughRandomness)?;
        Ok(out)
    }

    pub fn sha2_256(&self, messages: &[&[u8]]) -> [u8; SHA256_DIGEST_SIZE] {
        sha2_256(messages)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("crypto engine is not configured")]
    Unavailable,

    #[error("crypto engine is already installed")]
    AlreadyInstalled,

    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}
