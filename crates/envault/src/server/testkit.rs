//! Shared helpers for handler tests: a wired-up state over an in-memory
//! database, a temp storage directory, and a mock key service.

use std::sync::Arc;
use std::time::Duration;

use axum::response::Response;

use super::state::AppState;
use crate::auth::AuthKeys;
use crate::crypto::{AesGcmProvider, EnvelopeCrypter, OsRandom};
use crate::db::Store;
use crate::kms::testkit::MockKms;

pub const BOUNDARY: &str = "test-boundary";

/// Build an [`AppState`] backed by an in-memory database and a temp storage
/// directory. The directory guard must be kept alive by the caller.
pub async fn test_state(max_upload_size: u64) -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let store = Store::open_in_memory().await.expect("open store");
    let crypter = EnvelopeCrypter::new(
        store.clone(),
        Arc::new(MockKms),
        Arc::new(OsRandom),
        AesGcmProvider::new(max_upload_size as usize),
        Duration::from_secs(3600),
    );
    let auth_keys = AuthKeys::new(&OsRandom, Duration::from_secs(3600));
    let state = AppState::new(
        store,
        Arc::new(crypter),
        Arc::new(auth_keys),
        tmp.path().to_path_buf(),
        max_upload_size,
    );
    (state, tmp)
}

/// Build a well-formed upload body: a `file-size` field followed by a file
/// part, using [`BOUNDARY`].
pub fn upload_body(file_size: &[u8], filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file-size\"\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(file_size);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body");
    serde_json::from_slice(&bytes).expect("parse json body")
}

/// Collect a response body as raw bytes.
pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}
