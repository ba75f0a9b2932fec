//! AES-256-GCM sealing and opening of streamed file bodies.
//!
//! A fresh 96-bit nonce is drawn from the [`RandomSource`] for every
//! encryption; data keys are rotated long before the nonce birthday bound, so
//! a key+nonce pair is never reused.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::random::RandomSource;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AES-GCM encryption or decryption failed. On decryption this means the
    /// ciphertext or tag did not authenticate.
    #[error("aead operation failed")]
    AeadFailure,

    /// Reading the plaintext or ciphertext stream failed.
    #[error("stream read failed")]
    Read(#[from] std::io::Error),
}

/// Stateless AES-256-GCM provider operating on bounded streams.
///
/// Plaintext is buffered once, up to `max_file_size` bytes, and sealed in a
/// single AEAD call; the declared-size and body-size gates upstream bound what
/// actually arrives here.
#[derive(Debug, Clone, Copy)]
pub struct AesGcmProvider {
    max_file_size: usize,
}

impl AesGcmProvider {
    pub fn new(max_file_size: usize) -> Self {
        Self { max_file_size }
    }

    /// Read at most `max_file_size` plaintext bytes from `reader` (a short
    /// read is accepted) and seal them under `key` with a fresh random nonce.
    ///
    /// Returns the ciphertext with the tag appended, and the nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] for a non-256-bit key,
    /// [`CipherError::Read`] if the stream fails mid-read.
    pub async fn encrypt<R>(
        &self,
        reader: &mut R,
        key: &[u8],
        random: &dyn RandomSource,
    ) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CipherError>
    where
        R: AsyncRead + Unpin,
    {
        let cipher = build_cipher(key)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        random.fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut data = vec![0u8; self.max_file_size];
        let mut filled = 0;
        while filled < data.len() {
            let n = reader.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);

        let ciphertext = cipher
            .encrypt(nonce, data.as_slice())
            .map_err(|_| CipherError::AeadFailure)?;

        Ok((ciphertext, nonce_bytes))
    }

    /// Read the full remaining stream as ciphertext+tag and open it.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::AeadFailure`] if authentication fails (wrong
    /// key, wrong nonce, or tampered data).
    pub async fn decrypt<R>(
        &self,
        reader: &mut R,
        key: &[u8],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>, CipherError>
    where
        R: AsyncRead + Unpin,
    {
        let cipher = build_cipher(key)?;

        // Ciphertext is tag-extended, so it may exceed max_file_size.
        let mut ciphertext = Vec::with_capacity(self.max_file_size + TAG_LEN);
        reader.read_to_end(&mut ciphertext).await?;

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext.as_slice())
            .map_err(|_| CipherError::AeadFailure)
    }
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}
