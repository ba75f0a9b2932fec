//! Envelope crypter: data-key lifecycle, KMS wrap/unwrap, and the on-disk
//! ciphertext frame.
//!
//! # Frame layout
//!
//! ```text
//! offset 0  : u64 little-endian  data-key id
//! offset 8  : 12 bytes           AEAD nonce
//! offset 20 : N bytes            ciphertext || 16-byte tag
//! ```
//!
//! # Data-key lifecycle
//!
//! A new key is minted when none exists or when the newest one is older than
//! the rotation period: 32 random bytes are drawn, wrapped by the KMS, and
//! stored; the freshly drawn plaintext is used directly, without a second
//! KMS round trip. A fresh-enough key is unwrapped via the KMS per call.
//!
//! Minting is deliberately not serialised across tasks. Two concurrent
//! encrypts that both observe a stale key will both mint; every ciphertext
//! frame names its exact key by id, so the only cost is an extra KMS wrap.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::cipher::{AesGcmProvider, CipherError, KEY_LEN, NONCE_LEN};
use super::random::RandomSource;
use super::{CryptoError, DekBytes};
use crate::db::Store;
use crate::kms::KeyService;

/// Streams plaintext and ciphertext through the AEAD under KMS-wrapped data
/// keys. Owns no persistent state itself; the store, KMS, and random source
/// are shared collaborators.
#[derive(Clone)]
pub struct EnvelopeCrypter {
    store: Store,
    kms: Arc<dyn KeyService>,
    random: Arc<dyn RandomSource>,
    provider: AesGcmProvider,
    rotation_period: Duration,
}

impl EnvelopeCrypter {
    pub fn new(
        store: Store,
        kms: Arc<dyn KeyService>,
        random: Arc<dyn RandomSource>,
        provider: AesGcmProvider,
        rotation_period: Duration,
    ) -> Self {
        Self {
            store,
            kms,
            random,
            provider,
            rotation_period,
        }
    }

    /// Encrypt everything readable from `reader` and write the framed
    /// ciphertext to `writer`.
    pub async fn encrypt_and_copy<W, R>(&self, writer: &mut W, reader: &mut R) -> Result<(), CryptoError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let (key_id, key) = self.select_data_key().await?;

        let (ciphertext, nonce) = self
            .provider
            .encrypt(reader, key.as_slice(), self.random.as_ref())
            .await
            .map_err(into_crypto_error)?;

        writer.write_all(&key_id.to_le_bytes()).await?;
        writer.write_all(&nonce).await?;
        writer.write_all(&ciphertext).await?;
        Ok(())
    }

    /// Parse a ciphertext frame from `reader`, decrypt it, and write the
    /// plaintext to `writer`.
    pub async fn decrypt_and_copy<W, R>(&self, writer: &mut W, reader: &mut R) -> Result<(), CryptoError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let mut id_bytes = [0u8; 8];
        read_frame_field(reader, &mut id_bytes).await?;
        let key_id = i64::from_le_bytes(id_bytes);

        let data_key = self
            .store
            .data_key(key_id)
            .await?
            .ok_or(CryptoError::UnknownDataKey(key_id))?;
        let key = DekBytes::try_from(self.kms.decrypt(&data_key.wrapped_key).await?)?;

        let mut nonce = [0u8; NONCE_LEN];
        read_frame_field(reader, &mut nonce).await?;

        let plaintext = self
            .provider
            .decrypt(reader, key.as_slice(), &nonce)
            .await
            .map_err(into_crypto_error)?;

        writer.write_all(&plaintext).await?;
        Ok(())
    }

    /// Encrypt a filename by delegating to the KMS directly.
    ///
    /// Filenames are short, stored inline in the database, and benefit from
    /// the KMS's own authenticated mode; no data key is involved.
    pub async fn encrypt_filename(&self, filename: &str) -> Result<Vec<u8>, CryptoError> {
        Ok(self.kms.encrypt(filename.as_bytes()).await?)
    }

    /// Decrypt a filename previously produced by [`Self::encrypt_filename`].
    pub async fn decrypt_filename(&self, wrapped: &[u8]) -> Result<String, CryptoError> {
        let plaintext = self.kms.decrypt(wrapped).await?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Corrupted)
    }

    /// Pick the data key for an encryption: the newest stored key if it is
    /// fresh enough, otherwise a newly minted one.
    async fn select_data_key(&self) -> Result<(i64, DekBytes), CryptoError> {
        let now = unix_now();
        let rotation_secs = self.rotation_period.as_secs() as i64;

        if let Some(data_key) = self.store.newest_data_key().await? {
            if now.saturating_sub(data_key.created_at) <= rotation_secs {
                debug!(key_id = data_key.id, "reusing current data key");
                let key = DekBytes::try_from(self.kms.decrypt(&data_key.wrapped_key).await?)?;
                return Ok((data_key.id, key));
            }
        }

        let mut key_material = vec![0u8; KEY_LEN];
        self.random.fill(&mut key_material);
        let wrapped = self.kms.encrypt(&key_material).await?;
        let key = DekBytes::try_from(key_material)?;

        let key_id = self.store.add_data_key(&wrapped, now).await?;
        info!(key_id, "minted new data encryption key");
        Ok((key_id, key))
    }
}

/// Read an exact-size frame field, treating a truncated stream as corruption.
async fn read_frame_field<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), CryptoError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CryptoError::Corrupted
        } else {
            CryptoError::Io(err)
        }
    })?;
    Ok(())
}

fn into_crypto_error(err: CipherError) -> CryptoError {
    match err {
        CipherError::AeadFailure => CryptoError::Corrupted,
        CipherError::Read(io) => CryptoError::Io(io),
        other => CryptoError::Cipher(other),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
