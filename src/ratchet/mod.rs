// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chained ratchet state: forward-secure symmetric chains interleaved with DH ratchet steps,
//! plus the bounded cache of skipped message keys.
pub mod chain;
pub mod skipped;
pub mod step;

pub use chain::ChainKey;
pub use skipped::SkippedKeyStore;
pub use step::{DhStep, StepId, StepRing};
