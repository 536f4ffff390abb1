// SPDX-License-Identifier: MIT OR Apache-2.0

//! `whisper-ratchet` is the cryptographic core of a Double Ratchet secure-messaging library: a
//! two-party, asynchronous, end-to-end encrypted session providing forward secrecy and
//! post-compromise security.
//!
//! A session establishes its shared root key with an Extended Triple Diffie-Hellman (X3DH)
//! handshake against a published pre-key bundle, then advances a chained ratchet state: a
//! Diffie-Hellman ratchet rotating X25519 keypairs whenever the direction of messaging flips,
//! interleaved with symmetric HMAC chains deriving a fresh AES-256-GCM key for every message.
//! Out-of-order delivery is handled by deriving and caching message keys for skipped counters
//! under strict resource bounds.
//!
//! ## Overview
//!
//! - [`Identity`] owns the long-term signing and exchange keys plus one-time and signed
//!   pre-key pools, and assembles publishable [`PreKeyBundle`]s.
//! - [`Session::create_as_initiator`] opens a session towards a peer's bundle;
//!   [`Session::create_as_responder`] opens one from a received [`PreKeyMessage`].
//! - [`Session::encrypt`] and [`Session::decrypt`] advance the ratchet; both are awaitable and
//!   serialized per direction.
//! - The wire format is a deterministic length-prefixed binary framing, see [`codec`].
//!
//! ```ignore
//! CryptoEngine::install(CryptoEngine::default())?;
//! let engine = CryptoEngine::global()?;
//!
//! let bob = Identity::generate(2, 0, 1, &engine)?;
//! let session = Session::create_as_initiator(
//!     &bob,
//!     &alice_bundle,
//!     SessionOptions::default(),
//!     engine,
//! )?;
//! let first = session.encrypt(b"hello alice").await?;
//! ```
//!
//! ## Security
//!
//! Transport, identity storage at rest, group messaging and multi-device fan-out are out of
//! scope; collaborators only ferry opaque byte strings between peers. Persisted session
//! snapshots contain secret key material and must never be shared between devices.
pub mod codec;
pub mod crypto;
mod engine;
mod identity;
pub mod ratchet;
mod session;
mod x3dh;

pub use codec::{
    IdentityRecord, Message, MessageSigned, PreKeyBundle, PreKeyMessage, PreKeyRecord,
    SignedPreKeyRecord,
};
pub use crypto::CryptoError;
pub use engine::{CryptoEngine, EngineError};
pub use identity::{Identity, IdentityError, OneTimePreKey, RemoteIdentity, SignedPreKey};
pub use session::{
    OutboundMessage, Session, SessionError, SessionOptions, SkippedStats, SnapshotError,
};
pub use x3dh::X3dhError;
