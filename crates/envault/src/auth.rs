//! Session-token issuance: HS256 JWTs signed with a process-lifetime key.
//!
//! The signing key is drawn from the CSPRNG at boot and never persisted, so
//! every restart invalidates all outstanding tokens. That is acceptable for
//! the fixed time-to-live model here; sessions are cheap to re-establish.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::crypto::RandomSource;

const HMAC_KEY_LEN: usize = 32;

/// Claims carried in a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub iat: u64,
    pub exp: u64,
}

/// Token signing material plus the configured token lifetime.
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: Duration,
}

impl AuthKeys {
    /// Draw a fresh HMAC key and build the signing material.
    pub fn new(random: &dyn RandomSource, token_ttl: Duration) -> Self {
        let mut key = [0u8; HMAC_KEY_LEN];
        random.fill(&mut key);
        let keys = Self {
            encoding: EncodingKey::from_secret(&key),
            decoding: DecodingKey::from_secret(&key),
            token_ttl,
        };
        key.iter_mut().for_each(|b| *b = 0);
        keys
    }

    /// Issue a signed session token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if JWT encoding fails.
    pub fn issue(&self, user_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let claims = Claims {
            user_id,
            iat: now,
            exp: now + self.token_ttl.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}
