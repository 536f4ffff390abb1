// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM authenticated symmetric encryption with additional data (AEAD) with 256-bit key,
//! 128-bit tag and 96-bit nonce.
//!
//! Per-message keys and nonces are derived from the symmetric ratchet and used exactly once; the
//! ciphertext carries the authentication tag attached at its end.
use libcrux::aead::{Algorithm, Iv, Key, Tag, decrypt_detached, encrypt_detached};
use thiserror::Error;

const AEAD_ALGORITHM: Algorithm = Algorithm::Aes256Gcm;

pub type AeadNonce = [u8; AEAD_ALGORITHM.nonce_size()];

pub type AeadKey = [u8; AEAD_ALGORITHM.key_size()];

pub fn aead_encrypt(
    key: &AeadKey,
    plaintext: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    let key = Key::from_slice(AEAD_ALGORITHM, key).map_err(AeadError::InvalidArgument)?;
    let nonce = Iv::new(nonce).map_err(AeadError::InvalidArgument)?;

    let (tag, mut ciphertext) = encrypt_detached(&key, plaintext, nonce, aad.unwrap_or_default())
        .map_err(AeadError::Encrypt)?;

    // Attach authenticated tag to the end of ciphertext.
    ciphertext.extend_from_slice(tag.as_ref());

    Ok(ciphertext)
}

pub fn aead_decrypt(
    key: &AeadKey,
    ciphertext_tag: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    if ciphertext_tag.len() < AEAD_ALGORITHM.tag_size() {
        return Err(AeadError::InvalidArgument(
            libcrux::aead::InvalidArgumentError::InvalidTag,
        ));
    }

    // Extract authenticated tag from the end of ciphertext.
    let boundary = ciphertext_tag.len() - AEAD_ALGORITHM.tag_size();
    let ciphertext = &ciphertext_tag[..boundary];
    let tag = &ciphertext_tag[boundary..];

    let key = Key::from_slice(AEAD_ALGORITHM, key).map_err(AeadError::InvalidArgument)?;
    let nonce = Iv::new(nonce).map_err(AeadError::InvalidArgument)?;
    let tag = Tag::from_slice(tag).map_err(AeadError::InvalidArgument)?;

    let plaintext = decrypt_detached(&key, ciphertext, nonce, aad.unwrap_or_default(), &tag)
        .map_err(AeadError::Decrypt)?;

    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("invalid aead argument: {0}")]
    InvalidArgument(libcrux::aead::InvalidArgumentError),

    #[error("could not encrypt with aead: {0}")]
    Encrypt(libcrux::aead::EncryptError),

    #[error("could not decrypt with aead: {0}")]
    Decrypt(libcrux::aead::DecryptError),
}

#[cfg(test)]
mod tests {
    use crate::engine::CryptoEngine;

    use super::{AeadKey, AeadNonce, aead_decrypt, aead_encrypt};

    #[test]
    fn encrypt_decrypt_with_header_binding() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let key: AeadKey = engine.random_array().unwrap();
        let nonce: AeadNonce = engine.random_array().unwrap();
        let aad = [0, 0, 0, 1, 0, 0, 0, 0];

        let ciphertext = aead_encrypt(&key, b"hello alice", nonce, Some(&aad)).unwrap();
        let plaintext = aead_decrypt(&key, &ciphertext, nonce, Some(&aad)).unwrap();

        assert_eq!(plaintext, b"hello alice");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let key: AeadKey = engine.random_array().unwrap();
        let nonce: AeadNonce = engine.random_array().unwrap();

        let mut ciphertext = aead_encrypt(&key, b"hello alice", nonce, None).unwrap();
        ciphertext[0] ^= 0x01;

        assert!(aead_decrypt(&key, &ciphertext, nonce, None).is_err());
    }

    #[test]
    fn mismatched_aad_fails() {
        let engine = CryptoEngine::from_seed([1; 32]);

        let key: AeadKey = engine.random_array().unwrap();
        let nonce: AeadNonce = engine.random_array().unwrap();

        let ciphertext = aead_encrypt(&key, b"hello alice", nonce, Some(&[1, 2, 3])).unwrap();
        assert!(aead_decrypt(&key, &ciphertext, nonce, Some(&[3, 2, 1])).is_err());
    }
}
