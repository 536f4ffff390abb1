// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA2 hashing functions and public-key thumbprints.
use sha2::{Digest, Sha256};

pub const SHA256_DIGEST_SIZE: usize = 32;

/// SHA2-256 hashing function.
pub fn sha2_256(messages: &[&[u8]]) -> [u8; SHA256_DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message);
    }
    let result = hasher.finalize();
    result[..].try_into().expect("sha256 digest size")
}

/// Hex-encoded SHA2-256 digest of a 32-byte serialized public key, used as a stable string
/// identifier for DH ratchet steps and skipped-key lookups.
pub fn thumbprint(public_key: &[u8; 32]) -> String {
    hex::encode(sha2_256(&[public_key]))
}

#[cfg(test)]
mod tests {
    use super::{sha2_256, thumbprint};

    #[test]
    fn multi_part_digest_matches_concatenation() {
        assert_eq!(sha2_256(&[b"hello ", b"alice"]), sha2_256(&[b"hello alice"]));
    }

    #[test]
    fn thumbprint_is_stable_hex() {
        let key = [42u8; 32];
        let id = thumbprint(&key);
        assert_eq!(id.len(), 64);
        assert_eq!(id, thumbprint(&key));
        assert_ne!(id, thumbprint(&[43u8; 32]));
    }
}
