// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extended Triple Diffie-Hellman (X3DH) key agreement.
//!
//! Both parties derive the same session root key from up to four X25519 agreements between
//! identity, ephemeral base and pre-key material:
//!
//! ```text
//! DH1 = DH(IK_initiator, SPK_responder)
//! DH2 = DH(EK_initiator, IK_responder)
//! DH3 = DH(EK_initiator, SPK_responder)
//! DH4 = DH(EK_initiator, OPK_responder)   only when a one-time pre-key is in use
//! ```
//!
//! The root key is the single 32-byte HKDF output over `0xFF…FF ‖ DH1 ‖ DH2 ‖ DH3 ‖ DH4`.
//! Identity and signed-pre-key signatures are verified before any agreement is computed.
//!
//! <https://signal.org/docs/specifications/x3dh/>
use thiserror::Error;
use zeroize::Zeroize;

use crate::codec::{PreKeyBundle, PreKeyMessage};
use crate::crypto::Secret;
use crate::crypto::hkdf::{HkdfError, hkdf_blocks};
use crate::crypto::x25519::{AGREEMENT_SIZE, SecretKey, X25519Error};
use crate::identity::{Identity, IdentityError, RemoteIdentity};

pub(crate) const ROOT_KEY_SIZE: usize = 32;

const X3DH_INFO: &[u8] = b"Signal_X3DH";

/// Fixed prefix of the key material, separating X3DH output from any other use of the same DH
/// values.
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

/// Initiator-side key agreement against a published pre-key bundle.
///
/// `base_secret` is the ephemeral X25519 key generated for this session; its public half is
/// later carried to the responder inside the pre-key message.
pub(crate) fn initiate(
    identity: &Identity,
    base_secret: &SecretKey,
    bundle: &PreKeyBundle,
) -> Result<Secret<ROOT_KEY_SIZE>, X3dhError> {
    bundle.verify()?;

    let signed_prekey = &bundle.signed_prekey.key;
    let dh1 = identity.exchange_secret().calculate_agreement(signed_prekey)?;
    let dh2 = base_secret.calculate_agreement(&bundle.identity.exchange_key)?;
    let dh3 = base_secret.calculate_agreement(signed_prekey)?;
    let dh4 = match &bundle.prekey {
        Some(prekey) => Some(base_secret.calculate_agreement(&prekey.key)?),
        None => None,
    };

    derive_root(dh1, dh2, dh3, dh4)
}

/// Responder-side key agreement over a received pre-key message.
///
/// Looks up the signed pre-key the initiator used and, when the message cites a one-time
/// pre-key, consumes it: a second message citing the same id fails with
/// [`IdentityError::UnknownPreKey`].
pub(crate) fn respond(
    identity: &mut Identity,
    remote: &RemoteIdentity,
    message: &PreKeyMessage,
) -> Result<Secret<ROOT_KEY_SIZE>, X3dhError> {
    let signed_secret = identity
        .signed_prekey(message.signed_prekey_id)?
        .secret()
        .clone();

    let dh1 = signed_secret.calculate_agreement(remote.exchange_key())?;
    let dh2 = identity.exchange_secret().calculate_agreement(&message.base_key)?;
    let dh3 = signed_secret.calculate_agreement(&message.base_key)?;
    let dh4 = match message.prekey_id {
        Some(prekey_id) => {
            let onetime_secret = identity.take_one_time_prekey(prekey_id)?;
            Some(onetime_secret.calculate_agreement(&message.base_key)?)
        }
        None => None,
    };

    derive_root(dh1, dh2, dh3, dh4)
}

fn derive_root(
    dh1: [u8; AGREEMENT_SIZE],
    dh2: [u8; AGREEMENT_SIZE],
    dh3: [u8; AGREEMENT_SIZE],
    dh4: Option<[u8; AGREEMENT_SIZE]>,
) -> Result<Secret<ROOT_KEY_SIZE>, X3dhError> {
    let mut key_material = Vec::with_capacity(AGREEMENT_SIZE * 5);
    key_material.extend_from_slice(&DISCONTINUITY);
    key_material.extend_from_slice(&dh1);
    key_material.extend_from_slice(&dh2);
    key_material.extend_from_slice(&dh3);
    if let Some(dh4) = &dh4 {
        key_material.extend_from_slice(dh4);
    }

    let [root] = hkdf_blocks::<1>(&key_material, None, X3DH_INFO)?;
    key_material.zeroize();

    Ok(Secret::from_bytes(root))
}

#[derive(Debug, Error)]
pub enum X3dhError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    X25519(#[from] X25519Error),
}
