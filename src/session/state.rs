// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serializable session snapshots for the persistence contract.
//!
//! A snapshot carries the complete ratchet state: active local ratchet keypair, root key, DH
//! counter, step ring (with each step's chains and counters) and the skipped-key cache. The
//! blob contains secret key material; persistence layers must treat it accordingly and never
//! share it between devices.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Secret;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::ratchet::skipped::SkippedKeyStore;
use crate::ratchet::step::StepRing;
use crate::x3dh::ROOT_KEY_SIZE;

use super::{PendingPreKey, RatchetState};

const SNAPSHOT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
pub(crate) struct SessionSnapshot {
    version: u8,
    local_secret: SecretKey,
    local_public: PublicKey,
    root_key: Secret<ROOT_KEY_SIZE>,
    counter: u32,
    steps: StepRing,
    skipped: SkippedKeyStore,
    pending_prekey: Option<(Option<u32>, u32)>,
}

impl SessionSnapshot {
    pub fn capture(state: &RatchetState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            local_secret: state.local_secret.clone(),
            local_public: state.local_public,
            root_key: state.root_key.clone(),
            counter: state.counter,
            steps: state.steps.clone(),
            skipped: state.skipped.clone(),
            pending_prekey: state
                .pending_prekey
                .as_ref()
                .map(|pending| (pending.prekey_id, pending.signed_prekey_id)),
        }
    }

    pub fn into_state(self) -> RatchetState {
        RatchetState {
            local_secret: self.local_secret,
            local_public: self.local_public,
            root_key: self.root_key,
            counter: self.counter,
            steps: self.steps,
            skipped: self.skipped,
            pending_prekey: self
                .pending_prekey
                .map(|(prekey_id, signed_prekey_id)| PendingPreKey {
                    prekey_id,
                    signed_prekey_id,
                }),
        }
    }
}

pub(crate) fn encode_snapshot(snapshot: &SessionSnapshot) -> Result<Vec<u8>, SnapshotError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(snapshot, &mut bytes)?;
    Ok(bytes)
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<SessionSnapshot, SnapshotError> {
    let snapshot = ciborium::from_reader::<SessionSnapshot, _>(bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("could not encode session snapshot: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("could not decode session snapshot: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("unsupported session snapshot version {0}")]
    UnsupportedVersion(u8),
}
