// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-party session façade over the chained ratchet state.
//!
//! A [`Session`] owns its ratchet state exclusively: the active local ratchet keypair, the root
//! key, the bounded ring of DH steps and the skipped-key cache. `encrypt` and `decrypt` are
//! awaitable and serialized per direction through one async mutex each, guaranteeing strict
//! ordering of chain advances; cross-direction interleaving is safe because the two directions
//! touch disjoint parts of the state apart from the root key, which is only replaced at
//! chain-build time under the state lock.
//!
//! The very first outbound message of an initiator is wrapped in a [`PreKeyMessage`] carrying
//! everything the responder needs to complete X3DH; all later messages are bare
//! [`MessageSigned`] envelopes.
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

use crate::codec::{
    CodecError, IdentityRecord, Message, MessageSigned, PreKeyBundle, PreKeyMessage,
};
use crate::crypto::aead::{aead_decrypt, aead_encrypt};
use crate::crypto::ed25519::VerifyingKey;
use crate::crypto::hmac::{hmac_sha256, hmac_verify};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{CryptoError, Secret};
use crate::engine::{CryptoEngine, EngineError};
use crate::identity::{Identity, IdentityError, RemoteIdentity};
use crate::ratchet::chain::{ChainKey, MessageKeySeed};
use crate::ratchet::skipped::SkippedKeyStore;
use crate::ratchet::step::{DhStep, StepError, StepRing, derive_chain};
use crate::x3dh::{self, ROOT_KEY_SIZE, X3dhError};

mod state;

use state::{SessionSnapshot, decode_snapshot, encode_snapshot};
pub use state::SnapshotError;

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Size of the DH step ring; cap on historical peer ratchet keys retained.
    pub max_ratchet_steps: usize,

    /// Global cap on cached out-of-order message keys.
    pub max_skipped_keys: usize,

    /// Maximum age of any cached skipped key.
    pub skipped_key_ttl: Duration,

    /// Per-receiving-chain cap on in-chain skipped keys.
    pub max_message_keys_per_step: usize,

    /// Whether generated ratchet keys may be serialized.
    pub exportable_keys: bool,

    /// Enables additional logging of state transitions; no cryptographic effect.
    pub debug: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_ratchet_steps: 1000,
            max_skipped_keys: 10_000,
            skipped_key_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_message_keys_per_step: 1000,
            exportable_keys: false,
            debug: false,
        }
    }
}

/// Observable state of the skipped-key cache.
#[derive(Clone, Copy, Debug)]
pub struct SkippedStats {
    pub total_skipped_keys: usize,
    pub steps: usize,
    pub oldest_timestamp: Option<u64>,
}

/// Result of an `encrypt` call: a pre-key envelope for the session's very first outbound
/// message, a bare signed message afterwards.
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    PreKey(PreKeyMessage),
    Signed(MessageSigned),
}

impl OutboundMessage {
    /// The signed message itself, unwrapped from the pre-key envelope if present.
    pub fn signed_message(&self) -> &MessageSigned {
        match self {
            Self::PreKey(message) => &message.signed_message,
            Self::Signed(message) => message,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::PreKey(message) => message.to_bytes(),
            Self::Signed(message) => message.to_bytes(),
        }
    }
}

/// X3DH parameters still owed to the peer, carried until the first outbound message.
#[derive(Clone, Debug)]
struct PendingPreKey {
    prekey_id: Option<u32>,
    signed_prekey_id: u32,
}

/// Mutable ratchet state, guarded by the session state lock.
struct RatchetState {
    local_secret: SecretKey,
    local_public: PublicKey,
    root_key: Secret<ROOT_KEY_SIZE>,
    /// Number of local ratchet key rotations.
    counter: u32,
    steps: StepRing,
    skipped: SkippedKeyStore,
    pending_prekey: Option<PendingPreKey>,
}

type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// A two-party, asynchronous, end-to-end encrypted session.
pub struct Session {
    engine: Arc<CryptoEngine>,
    options: SessionOptions,
    local_signing_key: VerifyingKey,
    local_identity_record: IdentityRecord,
    local_registration_id: u32,
    remote_signing_key: VerifyingKey,
    remote_registration_id: u32,
    state: Mutex<RatchetState>,
    encrypt_queue: tokio::sync::Mutex<()>,
    decrypt_queue: tokio::sync::Mutex<()>,
    on_update: Mutex<Option<UpdateCallback>>,
}

impl Session {
    /// Opens a session towards a peer's published pre-key bundle.
    ///
    /// Verifies the bundle's identity and signed-pre-key signatures, runs the initiator side of
    /// X3DH and generates the ephemeral ratchet keypair whose public half later travels as the
    /// pre-key message's base key.
    pub fn create_as_initiator(
        identity: &Identity,
        bundle: &PreKeyBundle,
        options: SessionOptions,
        engine: Arc<CryptoEngine>,
    ) -> Result<Self, SessionError> {
        let remote = RemoteIdentity::from_record(bundle.registration_id, &bundle.identity)?;

        let base_secret = SecretKey::from_bytes(engine.random_array()?);
        let base_public = base_secret.public_key().map_err(CryptoError::from)?;
        let root_key = x3dh::initiate(identity, &base_secret, bundle)?;

        let mut steps = StepRing::new(options.max_ratchet_steps);
        steps.push(DhStep::new(bundle.signed_prekey.key));

        let skipped = SkippedKeyStore::new(
            options.max_skipped_keys,
            options.max_message_keys_per_step,
            options.skipped_key_ttl.as_millis() as u64,
        );

        let state = RatchetState {
            local_secret: base_secret,
            local_public: base_public,
            root_key,
            counter: 0,
            steps,
            skipped,
            pending_prekey: Some(PendingPreKey {
                prekey_id: bundle.prekey.as_ref().map(|prekey| prekey.id),
                signed_prekey_id: bundle.signed_prekey.id,
            }),
        };

        Ok(Self::from_parts(identity, &remote, options, engine, state))
    }

    /// Opens a session from a received pre-key message.
    ///
    /// Runs the responder side of X3DH, consuming the cited one-time pre-key. The signed
    /// pre-key pair the initiator targeted becomes the initial local ratchet keypair. The
    /// nested signed message is not decrypted here; pass it to [`Session::decrypt`] afterwards.
    pub fn create_as_responder(
        identity: &mut Identity,
        message: &PreKeyMessage,
        options: SessionOptions,
        engine: Arc<CryptoEngine>,
    ) -> Result<Self, SessionError> {
        let remote = RemoteIdentity::from_record(message.registration_id, &message.identity)?;

        let root_key = x3dh::respond(identity, &remote, message)?;

        let signed_prekey = identity.signed_prekey(message.signed_prekey_id)?;
        let local_secret = signed_prekey.secret().clone();
        let local_public = *signed_prekey.public_key();

        let mut steps = StepRing::new(options.max_ratchet_steps);
        steps.push(DhStep::new(message.signed_message.message.sender_ratchet_key));

        let skipped = SkippedKeyStore::new(
            options.max_skipped_keys,
            options.max_message_keys_per_step,
            options.skipped_key_ttl.as_millis() as u64,
        );

        let state = RatchetState {
            local_secret,
            local_public,
            root_key,
            counter: 0,
            steps,
            skipped,
            pending_prekey: None,
        };

        Ok(Self::from_parts(identity, &remote, options, engine, state))
    }

    fn from_parts(
        identity: &Identity,
        remote: &RemoteIdentity,
        options: SessionOptions,
        engine: Arc<CryptoEngine>,
        state: RatchetState,
    ) -> Self {
        Self {
            engine,
            options,
            local_signing_key: identity.verifying_key(),
            local_identity_record: identity.record(),
            local_registration_id: identity.registration_id(),
            remote_signing_key: *remote.signing_key(),
            remote_registration_id: remote.registration_id(),
            state: Mutex::new(state),
            encrypt_queue: tokio::sync::Mutex::new(()),
            decrypt_queue: tokio::sync::Mutex::new(()),
            on_update: Mutex::new(None),
        }
    }

    /// Encrypts a message towards the peer.
    ///
    /// Encrypt calls are serialized in FIFO order; each one advances the sending chain by
    /// exactly one step, rotating the DH ratchet first when the direction of messaging has
    /// flipped.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<OutboundMessage, SessionError> {
        let _serialized = self.encrypt_queue.lock().await;

        let outbound = {
            let mut state = self.state.lock().expect("session state lock");
            self.encrypt_inner(&mut state, plaintext)?
        };

        self.notify_update();
        Ok(outbound)
    }

    /// Decrypts a signed message from the peer.
    ///
    /// Decrypt calls are serialized in FIFO order. Out-of-order messages within a step are
    /// served from the skipped-key cache or by fast-forwarding the receiving chain, caching
    /// every key in between. A failed decrypt leaves the receiving chain untouched.
    pub async fn decrypt(&self, signed: &MessageSigned) -> Result<Vec<u8>, SessionError> {
        let _serialized = self.decrypt_queue.lock().await;

        let plaintext = {
            let mut state = self.state.lock().expect("session state lock");
            self.decrypt_inner(&mut state, signed)?
        };

        self.notify_update();
        Ok(plaintext)
    }

    /// Whether a peer ratchet key is present in the step ring.
    pub fn has_ratchet_key(&self, key: &PublicKey) -> bool {
        let state = self.state.lock().expect("session state lock");
        state.steps.contains(&key.thumbprint())
    }

    /// Number of local DH ratchet rotations performed so far.
    pub fn counter(&self) -> u32 {
        let state = self.state.lock().expect("session state lock");
        state.counter
    }

    /// Registration id of the remote peer.
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    /// Observable state of the skipped-key cache.
    pub fn stats(&self) -> SkippedStats {
        let state = self.state.lock().expect("session state lock");
        SkippedStats {
            total_skipped_keys: state.skipped.len(),
            steps: state.steps.len(),
            oldest_timestamp: state.skipped.oldest_timestamp(),
        }
    }

    /// Registers the callback fired after every successful encrypt or decrypt, letting
    /// persistence layers re-snapshot the session.
    pub fn set_on_update(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_update.lock().expect("update callback lock") = Some(Arc::new(callback));
    }

    /// Serializes the full ratchet state into an opaque blob.
    ///
    /// Requires the `exportable_keys` option. The blob contains secret key material and must
    /// not be shared between devices.
    pub fn serialize(&self) -> Result<Vec<u8>, SessionError> {
        if !self.options.exportable_keys {
            return Err(SessionError::KeysNotExportable);
        }

        let state = self.state.lock().expect("session state lock");
        let snapshot = SessionSnapshot::capture(&state);
        Ok(encode_snapshot(&snapshot)?)
    }

    /// Reconstructs a session from a serialized blob and the identities it belonged to.
    ///
    /// A snapshot with an unknown version tag is rejected as
    /// [`SessionError::MalformedMessage`].
    pub fn restore(
        bytes: &[u8],
        identity: &Identity,
        remote: &RemoteIdentity,
        options: SessionOptions,
        engine: Arc<CryptoEngine>,
    ) -> Result<Self, SessionError> {
        let snapshot = decode_snapshot(bytes).map_err(|error| match error {
            SnapshotError::UnsupportedVersion(version) => {
                SessionError::MalformedMessage(CodecError::UnsupportedVersion {
                    record: "session_snapshot",
                    version: u32::from(version),
                })
            }
            error => SessionError::Snapshot(error),
        })?;
        let state = snapshot.into_state();
        Ok(Self::from_parts(identity, remote, options, engine, state))
    }

    fn encrypt_inner(
        &self,
        state: &mut RatchetState,
        plaintext: &[u8],
    ) -> Result<OutboundMessage, SessionError> {
        let (needs_chain, direction_flip, remote_key) = {
            let step = state
                .steps
                .current_mut()
                .expect("session always holds at least one step");
            (
                step.sending().is_none(),
                step.receiving().is_some(),
                *step.remote_key(),
            )
        };

        if needs_chain {
            state.counter += 1;
            if direction_flip {
                // The current keypair already fed a receiving chain; inject fresh entropy.
                let secret = SecretKey::from_bytes(self.engine.random_array()?);
                state.local_public = secret.public_key().map_err(CryptoError::from)?;
                state.local_secret = secret;
            }
            let chain = derive_chain(&mut state.root_key, &state.local_secret, &remote_key)?;
            state
                .steps
                .current_mut()
                .expect("session always holds at least one step")
                .set_sending(chain);
            debug!(counter = state.counter, "sending chain rotated");
        }

        let seed = state
            .steps
            .current_mut()
            .expect("session always holds at least one step")
            .sending_mut()
            .expect("sending chain exists after rotation")
            .advance();
        let keys = seed.derive_message_keys().map_err(CryptoError::from)?;

        let mut message = Message {
            sender_ratchet_key: state.local_public,
            counter: seed.counter(),
            previous_counter: state.counter,
            ciphertext: Vec::new(),
        };
        let header = message.header_binding();
        message.ciphertext =
            aead_encrypt(keys.cipher_key(), plaintext, keys.nonce(), Some(&header))
                .map_err(CryptoError::from)?;

        // The envelope tag binds both signing identities to the encoded message.
        let signature = hmac_sha256(
            keys.mac_key(),
            &[
                self.remote_signing_key.as_bytes(),
                self.local_signing_key.as_bytes(),
                &message.to_bytes(),
            ],
        );
        let signed = MessageSigned {
            sender_key: self.local_signing_key,
            message,
            signature,
        };

        if self.options.debug {
            debug!(
                counter = signed.message.counter,
                previous_counter = signed.message.previous_counter,
                "message encrypted"
            );
        }

        match state.pending_prekey.take() {
            Some(pending) => Ok(OutboundMessage::PreKey(PreKeyMessage {
                registration_id: self.local_registration_id,
                prekey_id: pending.prekey_id,
                signed_prekey_id: pending.signed_prekey_id,
                base_key: state.local_public,
                identity: self.local_identity_record.clone(),
                signed_message: signed,
            })),
            None => Ok(OutboundMessage::Signed(signed)),
        }
    }

    fn decrypt_inner(
        &self,
        state: &mut RatchetState,
        signed: &MessageSigned,
    ) -> Result<Vec<u8>, SessionError> {
        let message = &signed.message;
        let counter = message.counter;

        // Advisory too-old check against the sender's DH counter at encryption time.
        let window_floor = state
            .counter
            .saturating_sub(self.options.max_ratchet_steps as u32);
        if message.previous_counter < window_floor {
            return Err(SessionError::MessageOutsideRatchetWindow {
                previous_counter: message.previous_counter,
                session_counter: state.counter,
            });
        }

        let now = now_millis();
        state.skipped.purge_expired(now);

        let step_id = message.sender_ratchet_key.thumbprint();

        // A new peer ratchet key opens a new DH step; the oldest step and its skipped keys are
        // dropped when the ring is full.
        if !state.steps.contains(&step_id) {
            if let Some(evicted) = state.steps.push(DhStep::new(message.sender_ratchet_key)) {
                state.skipped.purge_for_step(&evicted);
                debug!(step = %evicted, "ratchet step evicted");
            }
            debug!(step = %step_id, "ratchet step pushed");
        }

        let step = state
            .steps
            .get_mut(&step_id)
            .expect("step is present after push");
        if step.receiving().is_none() {
            // Built with the still-current local ratchet key; mirrors the sender's derivation.
            let chain = derive_chain(&mut state.root_key, &state.local_secret, &message.sender_ratchet_key)?;
            state
                .steps
                .get_mut(&step_id)
                .expect("step is present after push")
                .set_receiving(chain);
            debug!(step = %step_id, "receiving chain derived");
        }

        // Obtain the message key: from the cache, or by fast-forwarding a scratch copy of the
        // chain. Nothing is committed until the tag and the AEAD both verify.
        let mut advanced: Option<(ChainKey, Vec<(u32, Secret<32>)>)> = None;
        let seed = match state.skipped.consume(&step_id, counter) {
            Some(secret) => MessageKeySeed::from_secret(secret, counter),
            None => {
                let step = state
                    .steps
                    .get_mut(&step_id)
                    .expect("step is present after push");
                let chain = step.receiving().expect("receiving chain was just ensured");

                if counter < chain.counter() {
                    // The key for this counter was derived before and is gone from the cache:
                    // either the message is a replay or the key fell to eviction.
                    return Err(match state.skipped.evictions_for(&step_id) {
                        0 => SessionError::DuplicateMessage(counter),
                        _ => SessionError::DecryptFailed,
                    });
                }
                if (counter - chain.counter()) as usize > self.options.max_skipped_keys {
                    return Err(SessionError::MessageOutsideRatchetWindow {
                        previous_counter: message.previous_counter,
                        session_counter: state.counter,
                    });
                }

                let mut scratch = chain.clone();
                let mut pending = Vec::new();
                while scratch.counter() < counter {
                    let skipped = scratch.advance();
                    pending.push((skipped.counter(), skipped.into_secret()));
                }
                let seed = scratch.advance();
                advanced = Some((scratch, pending));
                seed
            }
        };

        let keys = seed.derive_message_keys().map_err(CryptoError::from)?;

        // Verify the envelope tag under our own signing key before touching the ciphertext.
        let tag_valid = hmac_verify(
            keys.mac_key(),
            &[
                self.local_signing_key.as_bytes(),
                signed.sender_key.as_bytes(),
                &message.to_bytes(),
            ],
            &signed.signature,
        );
        if !tag_valid {
            return Err(SessionError::DecryptFailed);
        }

        let header = message.header_binding();
        let plaintext = aead_decrypt(
            keys.cipher_key(),
            &message.ciphertext,
            keys.nonce(),
            Some(&header),
        )
        .map_err(|_| SessionError::DecryptFailed)?;

        // Success: commit the chain advance and cache the freshly skipped keys.
        if let Some((scratch, pending)) = advanced {
            if !pending.is_empty() {
                debug!(step = %step_id, count = pending.len(), "skipped keys cached");
            }
            for (skipped_counter, secret) in pending {
                state.skipped.store(&step_id, skipped_counter, secret, now);
            }
            state
                .steps
                .get_mut(&step_id)
                .expect("step is present after push")
                .set_receiving(scratch);
        }
        state
            .steps
            .get_mut(&step_id)
            .expect("step is present after push")
            .mark_decrypted(counter);

        if self.options.debug {
            debug!(counter, step = %step_id, "message decrypted");
        }

        Ok(plaintext)
    }

    fn notify_update(&self) {
        let callback = self
            .on_update
            .lock()
            .expect("update callback lock")
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH!")
        .as_millis() as u64
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] CodecError),

    #[error("bad identity: {0}")]
    BadIdentity(#[source] IdentityError),

    #[error("unknown or already consumed pre-key {0}")]
    UnknownPreKey(u32),

    #[error("message outside ratchet window: previous counter {previous_counter}, session counter {session_counter}")]
    MessageOutsideRatchetWindow {
        previous_counter: u32,
        session_counter: u32,
    },

    #[error("message with counter {0} was already decrypted")]
    DuplicateMessage(u32),

    #[error("decryption failed")]
    DecryptFailed,

    #[error("crypto engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),

    #[error("ratchet keys are not exportable in this session")]
    KeysNotExportable,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<IdentityError> for SessionError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::UnknownPreKey(id) => SessionError::UnknownPreKey(id),
            IdentityError::Engine(error) => SessionError::EngineUnavailable(error),
            error => SessionError::BadIdentity(error),
        }
    }
}

impl From<X3dhError> for SessionError {
    fn from(error: X3dhError) -> Self {
        match error {
            X3dhError::Identity(error) => error.into(),
            X3dhError::Hkdf(error) => SessionError::Crypto(error.into()),
            X3dhError::X25519(error) => SessionError::Crypto(error.into()),
        }
    }
}

impl From<StepError> for SessionError {
    fn from(error: StepError) -> Self {
        match error {
            StepError::Hkdf(error) => SessionError::Crypto(error.into()),
            StepError::X25519(error) => SessionError::Crypto(error.into()),
        }
    }
}
