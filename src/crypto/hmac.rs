// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyed message authentication (HMAC) with SHA256.
//!
//! Chain-key advancement and the per-message authentication tag of signed messages are both
//! HMAC-SHA-256. Tag verification is constant-time.
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const HMAC_TAG_SIZE: usize = 32;

/// HMAC-SHA-256 over the concatenation of `messages`, keyed by `key`.
pub fn hmac_sha256(key: &[u8], messages: &[&[u8]]) -> [u8; HMAC_TAG_SIZE] {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("hmac-sha256 accepts keys of any length");
    for message in messages {
        mac.update(message);
    }
    let result = mac.finalize().into_bytes();
    result[..].try_into().expect("hmac-sha256 tag size")
}

/// Constant-time verification of an HMAC-SHA-256 tag.
pub fn hmac_verify(key: &[u8], messages: &[&[u8]], tag: &[u8]) -> bool {
    let expected = hmac_sha256(key, messages);
    bool::from(expected.ct_eq(tag))
}
