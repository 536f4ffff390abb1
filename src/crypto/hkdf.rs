// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hashed Message Authentication Code (HMAC)-based key derivation function (HKDF) using
//! "hash-mode" with SHA256.
//!
//! All key derivations in this protocol expand into one or more independent 32-byte output
//! blocks. When a caller passes no salt, a 32-byte zero vector is used instead.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

pub const HKDF_BLOCK_SIZE: usize = 32;

const ZERO_SALT: [u8; HKDF_BLOCK_SIZE] = [0; HKDF_BLOCK_SIZE];

/// Extracts from `ikm` and expands into `N` independent 32-byte output blocks.
pub fn hkdf_blocks<const N: usize>(
    ikm: &[u8],
    salt: Option<&[u8; HKDF_BLOCK_SIZE]>,
    info: &[u8],
) -> Result<[[u8; HKDF_BLOCK_SIZE]; N], HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(salt.unwrap_or(&ZERO_SALT)), ikm);
    let mut okm = vec![0u8; N * HKDF_BLOCK_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidArguments)?;

    let mut blocks = [[0u8; HKDF_BLOCK_SIZE]; N];
    for (block, chunk) in blocks.iter_mut().zip(okm.chunks_exact(HKDF_BLOCK_SIZE)) {
        block.copy_from_slice(chunk);
    }
    Ok(blocks)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("arguments too large for hkdf")]
    InvalidArguments,
}
