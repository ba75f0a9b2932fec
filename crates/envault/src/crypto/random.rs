//! Cryptographically strong byte source, abstracted for testability.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;

/// Source of cryptographically strong random bytes.
///
/// Implementations must fill the buffer completely.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// [`RandomSource`] backed by the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}
