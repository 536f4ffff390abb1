// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core cryptographic algorithms.
//!
//! Algorithms:
//! - X25519 ECDH key agreement
//! - Ed25519 (SHA512) DSA
//! - SHA256 HKDF
//! - HMAC-SHA256
//! - AES-256-GCM AEAD
//! - SHA256 public-key thumbprints
use thiserror::Error;

pub mod aead;
pub mod ed25519;
pub mod hkdf;
pub mod hmac;
mod secret;
pub mod sha2;
pub mod x25519;

pub use secret::Secret;

/// Umbrella error for primitive failures which carry no protocol meaning of their own.
///
/// Protocol-level failures (bad signatures, failed decryptions, unknown pre-keys) are never
/// folded in here; they surface under their own error kinds at the session boundary.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Aead(#[from] aead::AeadError),

    #[error(transparent)]
    Hkdf(#[from] hkdf::HkdfError),

    #[error(transparent)]
    X25519(#[from] x25519::X25519Error),
}
