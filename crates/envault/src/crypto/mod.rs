//! Envelope-encryption engine: random source, AEAD provider, and the
//! crypter that ties them to the data-key store and the KMS.

pub mod cipher;
pub mod crypter;
pub mod random;

pub use cipher::{AesGcmProvider, CipherError, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use crypter::EnvelopeCrypter;
pub use random::{OsRandom, RandomSource};

use thiserror::Error;

use crate::db::StoreError;
use crate::kms::KmsError;

/// Opaque crypter failure. Details are logged by the caller, never sent on
/// the wire.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key-wrapping round trip to the KMS failed.
    #[error("key service request failed")]
    Kms(#[from] KmsError),

    /// Reading or writing the data-key table failed.
    #[error("data key store access failed")]
    Store(#[from] StoreError),

    /// A ciphertext frame references a data-key id with no stored row.
    #[error("data key {0} is not known")]
    UnknownDataKey(i64),

    /// The KMS returned key material of the wrong length.
    #[error("data key has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The ciphertext frame is truncated, fails authentication, or carries a
    /// filename that is not valid UTF-8.
    #[error("ciphertext is corrupted or truncated")]
    Corrupted,

    /// AEAD sealing failed.
    #[error(transparent)]
    Cipher(CipherError),

    /// The plaintext or ciphertext stream failed.
    #[error("i/o failure in encryption stream")]
    Io(#[from] std::io::Error),
}

/// Fixed-size buffer holding exactly [`KEY_LEN`] bytes of plaintext key
/// material. The memory is overwritten with zeroes on drop so the unwrapped
/// key does not outlive its use.
pub struct DekBytes(Box<[u8; KEY_LEN]>);

impl DekBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }
}

impl TryFrom<Vec<u8>> for DekBytes {
    type Error = CryptoError;

    fn try_from(mut value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != KEY_LEN {
            value.iter_mut().for_each(|b| *b = 0);
            return Err(CryptoError::InvalidKeyLength(value.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(&value);
        value.iter_mut().for_each(|b| *b = 0);
        Ok(Self(buf))
    }
}

impl Drop for DekBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("DekBytes([REDACTED])")
    }
}
