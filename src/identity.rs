// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term identity and pre-key material.
//!
//! An [`Identity`] owns an Ed25519 signing keypair, an X25519 exchange keypair and pools of
//! one-time and signed X25519 pre-keys. It is created once per user and mutated only by pre-key
//! consumption and replenishment. Peers are admitted as [`RemoteIdentity`] after their identity
//! signature has been verified.
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec::{IdentityRecord, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
use crate::crypto::ed25519::{Signature, SignatureError, SigningKey, VerifyingKey};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::engine::{CryptoEngine, EngineError};

/// X25519 pre-key pair which may be used in exactly one X3DH handshake.
#[derive(Debug)]
pub struct OneTimePreKey {
    id: u32,
    secret: SecretKey,
    public: PublicKey,
}

impl OneTimePreKey {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

/// X25519 pre-key pair signed by the identity, reusable until rotated out.
#[derive(Debug)]
pub struct SignedPreKey {
    id: u32,
    secret: SecretKey,
    public: PublicKey,
    signature: Signature,
}

impl SignedPreKey {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

/// Locally owned long-term identity.
#[derive(Debug)]
pub struct Identity {
    registration_id: u32,
    signing_key: SigningKey,
    exchange_secret: SecretKey,
    exchange_key: PublicKey,
    exchange_signature: Signature,
    one_time_prekeys: Vec<OneTimePreKey>,
    signed_prekeys: Vec<SignedPreKey>,
    next_one_time_id: u32,
    next_signed_id: u32,
    created_at: DateTime<Utc>,
}

impl Identity {
    /// Generates a fresh identity with `one_time` one-time pre-keys and `signed` signed
    /// pre-keys.
    pub fn generate(
        registration_id: u32,
        one_time: usize,
        signed: usize,
        engine: &CryptoEngine,
    ) -> Result<Self, IdentityError> {
        let signing_key = SigningKey::from_bytes(engine.random_array()?);
        let exchange_secret = SecretKey::from_bytes(engine.random_array()?);
        let exchange_key = exchange_secret.public_key()?;
        let exchange_signature = signing_key.sign(exchange_key.as_bytes())?;

        // Wire dates carry millisecond precision, so the stored timestamp does too.
        let now = Utc::now();
        let created_at = DateTime::from_timestamp_millis(now.timestamp_millis())
            .expect("current time is representable in milliseconds");

        let mut identity = Self {
            registration_id,
            signing_key,
            exchange_secret,
            exchange_key,
            exchange_signature,
            one_time_prekeys: Vec::new(),
            signed_prekeys: Vec::new(),
            next_one_time_id: 1,
            next_signed_id: 1,
            created_at,
        };
        identity.replenish_one_time_prekeys(one_time, engine)?;
        for _ in 0..signed {
            identity.add_signed_prekey(engine)?;
        }
        Ok(identity)
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    pub(crate) fn exchange_secret(&self) -> &SecretKey {
        &self.exchange_secret
    }

    /// The public identity block peers verify before admitting us into a session.
    pub fn record(&self) -> IdentityRecord {
        IdentityRecord {
            signing_key: self.signing_key.verifying_key(),
            exchange_key: self.exchange_key,
            signature: self.exchange_signature.clone(),
            created_at: self.created_at,
        }
    }

    /// Assembles a publishable pre-key bundle from the latest signed pre-key and, if one is
    /// still available, a one-time pre-key. The one-time pre-key is only consumed once a peer
    /// actually cites it in a pre-key message.
    pub fn bundle(&self) -> Result<PreKeyBundle, IdentityError> {
        let signed = self
            .signed_prekeys
            .last()
            .ok_or(IdentityError::NoSignedPreKeys)?;

        Ok(PreKeyBundle {
            registration_id: self.registration_id,
            identity: self.record(),
            prekey: self.one_time_prekeys.first().map(|prekey| PreKeyRecord {
                id: prekey.id,
                key: prekey.public,
            }),
            signed_prekey: SignedPreKeyRecord {
                id: signed.id,
                key: signed.public,
                signature: signed.signature.clone(),
            },
        })
    }

    /// Tops the one-time pre-key pool back up by `count` keys.
    pub fn replenish_one_time_prekeys(
        &mut self,
        count: usize,
        engine: &CryptoEngine,
    ) -> Result<(), IdentityError> {
        for _ in 0..count {
            let secret = SecretKey::from_bytes(engine.random_array()?);
            let public = secret.public_key()?;
            self.one_time_prekeys.push(OneTimePreKey {
                id: self.next_one_time_id,
                secret,
                public,
            });
            self.next_one_time_id += 1;
        }
        Ok(())
    }

    /// Generates and signs one additional signed pre-key.
    pub fn add_signed_prekey(&mut self, engine: &CryptoEngine) -> Result<(), IdentityError> {
        let secret = SecretKey::from_bytes(engine.random_array()?);
        let public = secret.public_key()?;
        let signature = self.signing_key.sign(public.as_bytes())?;
        self.signed_prekeys.push(SignedPreKey {
            id: self.next_signed_id,
            secret,
            public,
            signature,
        });
        self.next_signed_id += 1;
        Ok(())
    }

    /// Removes and returns the one-time pre-key with the given id.
    ///
    /// A second call with the same id fails: one-time pre-keys are consumed at most once.
    pub(crate) fn take_one_time_prekey(&mut self, id: u32) -> Result<SecretKey, IdentityError> {
        let index = self
            .one_time_prekeys
            .iter()
            .position(|prekey| prekey.id == id)
            .ok_or(IdentityError::UnknownPreKey(id))?;
        Ok(self.one_time_prekeys.remove(index).secret)
    }

    pub(crate) fn signed_prekey(&self, id: u32) -> Result<&SignedPreKey, IdentityError> {
        self.signed_prekeys
            .iter()
            .find(|prekey| prekey.id == id)
            .ok_or(IdentityError::UnknownPreKey(id))
    }
}

/// Peer identity admitted into a session after signature verification.
#[derive(Clone, Debug)]
pub struct RemoteIdentity {
    registration_id: u32,
    signing_key: VerifyingKey,
    exchange_key: PublicKey,
    created_at: DateTime<Utc>,
}

impl RemoteIdentity {
    /// Verifies the identity signature (over the serialized exchange key, under the signing
    /// key) and admits the peer.
    pub fn from_record(
        registration_id: u32,
        record: &IdentityRecord,
    ) -> Result<Self, IdentityError> {
        record
            .signing_key
            .verify(record.exchange_key.as_bytes(), &record.signature)
            .map_err(|_| IdentityError::BadIdentitySignature)?;

        Ok(Self {
            registration_id,
            signing_key: record.signing_key,
            exchange_key: record.exchange_key,
            created_at: record.created_at,
        })
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn signing_key(&self) -> &VerifyingKey {
        &self.signing_key
    }

    pub fn exchange_key(&self) -> &PublicKey {
        &self.exchange_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl PreKeyBundle {
    /// Verifies the bundle's identity signature and the signed pre-key signature under the
    /// bundle's identity signing key.
    pub fn verify(&self) -> Result<(), IdentityError> {
        self.identity
            .signing_key
            .verify(self.identity.exchange_key.as_bytes(), &self.identity.signature)
            .map_err(|_| IdentityError::BadIdentitySignature)?;

        self.identity
            .signing_key
            .verify(self.signed_prekey.key.as_bytes(), &self.signed_prekey.signature)
            .map_err(|_| IdentityError::BadPreKeySignature)?;

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity signature does not verify")]
    BadIdentitySignature,

    #[error("signed pre-key signature does not verify")]
    BadPreKeySignature,

    #[error("unknown or already consumed pre-key {0}")]
    UnknownPreKey(u32),

    #[error("identity holds no signed pre-keys")]
    NoSignedPreKeys,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    X25519(#[from] X25519Error),
}
