//! Shared application state injected into every Axum handler.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthKeys;
use crate::crypto::EnvelopeCrypter;
use crate::db::Store;

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    /// File metadata, data keys, and users.
    pub store: Store,
    /// Envelope-encryption engine.
    pub crypter: Arc<EnvelopeCrypter>,
    /// Session-token signing material.
    pub auth_keys: Arc<AuthKeys>,
    /// Absolute directory receiving encrypted file blobs.
    pub storage_dir: Arc<PathBuf>,
    /// Hard cap on an upload request body, in bytes.
    pub max_upload_size: u64,
}

impl AppState {
    pub fn new(
        store: Store,
        crypter: Arc<EnvelopeCrypter>,
        auth_keys: Arc<AuthKeys>,
        storage_dir: PathBuf,
        max_upload_size: u64,
    ) -> Self {
        Self {
            store,
            crypter,
            auth_keys,
            storage_dir: Arc::new(storage_dir),
            max_upload_size,
        }
    }
}
