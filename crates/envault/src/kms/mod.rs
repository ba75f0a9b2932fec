//! Key-wrapping service abstraction.
//!
//! The crypter only needs two operations from the KMS: wrap (encrypt) and
//! unwrap (decrypt) an opaque byte string under the remote key-encryption
//! key. The wire protocol behind them is an implementation detail of
//! [`vault::VaultTransit`].

pub mod vault;

pub use vault::VaultTransit;

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a key-wrapping service.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The request never completed, or completed with a non-2xx status. The
    /// response body, when one was received, is captured for the log.
    #[error("key service transport failed: {0}")]
    Transport(String),

    /// The response arrived but could not be understood.
    #[error("key service returned a malformed response: {0}")]
    Protocol(String),
}

/// Remote key-wrapping service.
///
/// `decrypt(encrypt(p))` must return exactly `p`.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Wrap `plaintext` under the remote key; the result is opaque.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Unwrap a previously returned wrapped value.
    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError>;
}

#[cfg(test)]
pub(crate) mod testkit {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    use super::*;

    /// In-process [`KeyService`] that frames the plaintext the way the Vault
    /// transit backend does (`vault:v1:<base64>`), without any actual key.
    pub struct MockKms;

    #[async_trait]
    impl KeyService for MockKms {
        async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
            Ok(format!("vault:v1:{}", STANDARD.encode(plaintext)).into_bytes())
        }

        async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
            let text = std::str::from_utf8(wrapped)
                .map_err(|e| KmsError::Protocol(e.to_string()))?;
            let encoded = text
                .strip_prefix("vault:v1:")
                .ok_or_else(|| KmsError::Protocol("missing ciphertext prefix".into()))?;
            STANDARD
                .decode(encoded)
                .map_err(|e| KmsError::Protocol(e.to_string()))
        }
    }

    #[tokio::test]
    async fn mock_round_trips() {
        let kms = MockKms;
        let wrapped = kms.encrypt(b"plain dek bytes").await.unwrap();
        assert_ne!(wrapped, b"plain dek bytes");
        let plain = kms.decrypt(&wrapped).await.unwrap();
        assert_eq!(plain, b"plain dek bytes");
    }

    #[tokio::test]
    async fn mock_rejects_unframed_input() {
        let kms = MockKms;
        assert!(kms.decrypt(b"garbage").await.is_err());
    }
}
