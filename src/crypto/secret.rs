// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container for fixed-size secret byte strings.
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Fixed-size secret bytes: root keys, chain keys and message-key precursors all live in here.
///
/// The wrapper closes the obvious side doors for key material: memory is zeroised on drop,
/// byte access stays crate-private, `Debug` output is redacted in every build profile
/// (including tests) and equality is constant-time. Side channels are ultimately a property of
/// the deployed system and its hardware, so this is containment, not proof.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Secret<const N: usize>(#[serde(with = "serde_bytes")] [u8; N]);

impl<const N: usize> Secret<N> {
    pub(crate) fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret<{N}>(redacted)")
    }
}

#[cfg(test)]
mod tests {
    use super::Secret;

    #[test]
    fn constant_time_equality() {
        let secret_1 = Secret::from_bytes([7; 32]);
        let secret_2 = Secret::from_bytes([7; 32]);
        let secret_3 = Secret::from_bytes([8; 32]);

        assert_eq!(secret_1, secret_2);
        assert_ne!(secret_1, secret_3);
    }

    #[test]
    fn debug_output_reveals_only_the_width() {
        let secret = Secret::from_bytes([0xAB; 32]);
        assert_eq!(format!("{secret:?}"), "Secret<32>(redacted)");
    }
}
