//! Download pipeline: id lookup, filename decryption, and the streamed
//! multipart response wrapping the decrypted file body.
//!
//! The id travels in a JSON body rather than the URL, so `POST` is used for
//! wire compatibility with existing clients.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use common::error::ApiErrorCode;
use common::protocol::FileRequest;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tracing::error;
use uuid::Uuid;

use super::reply;
use super::state::AppState;
use crate::crypto::{CryptoError, EnvelopeCrypter};

/// Longest accepted request body, in bytes. The body only ever carries a
/// UUID, so anything bigger is malformed.
const MAX_CONTENT_LEN: i64 = 512;

/// `POST /api/download` — stream a decrypted file back as a multipart body.
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        error!("invalid content type on download");
        return reply::error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiErrorCode::InvalidContentFormat,
            "invalid Content-Type; expected application/json",
        );
    }

    let content_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok());
    match content_len {
        Some(len) if (0..=MAX_CONTENT_LEN).contains(&len) => {}
        _ => {
            error!(?content_len, "invalid content length on download");
            return reply::error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorCode::InvalidContentFormat,
                "invalid content length",
            );
        }
    }

    let request: FileRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "invalid download request body");
            return reply::error(
                StatusCode::BAD_REQUEST,
                ApiErrorCode::InvalidContentFormat,
                "invalid json",
            );
        }
    };

    let encrypted_filename = match state.store.file_name(&request.id).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            return reply::error(
                StatusCode::NOT_FOUND,
                ApiErrorCode::NotFound,
                "no file with provided id was found",
            );
        }
        Err(err) => {
            error!(error = ?err, "could not read file record");
            return reply::error(
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::InternalApiError,
                "",
            );
        }
    };

    let filename = match state.crypter.decrypt_filename(&encrypted_filename).await {
        Ok(filename) => filename,
        Err(err) => {
            error!(error = ?err, "could not decrypt file name");
            return reply::error(
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::InternalApiError,
                "",
            );
        }
    };

    let path = state.storage_dir.join(&request.id);
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            // Most likely an orphaned row whose blob never landed.
            error!(error = %err, path = %path.display(), "could not open stored file");
            return reply::error(
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::InternalApiError,
                "",
            );
        }
    };

    // Stream the multipart response through an in-process pipe. Headers go
    // out first; a decryption failure after that can only terminate the
    // stream, which the client sees as a truncated body.
    let boundary = Uuid::new_v4().simple().to_string();
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let crypter = Arc::clone(&state.crypter);
    let part_boundary = boundary.clone();
    tokio::spawn(async move {
        if let Err(err) = write_file_part(writer, crypter, file, &part_boundary, &filename).await {
            error!(error = ?err, "download stream terminated");
        }
    });

    (
        [(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|media_type| {
            media_type.type_() == mime::APPLICATION && media_type.subtype() == mime::JSON
        })
        .unwrap_or(false)
}

/// Write one `file` form part containing the decrypted body, then the
/// closing boundary.
async fn write_file_part(
    mut writer: DuplexStream,
    crypter: Arc<EnvelopeCrypter>,
    mut file: File,
    boundary: &str,
    filename: &str,
) -> Result<(), CryptoError> {
    let header = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
         filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        escape_quotes(filename),
    );
    writer.write_all(header.as_bytes()).await?;
    crypter.decrypt_and_copy(&mut writer, &mut file).await?;
    writer
        .write_all(format!("\r\n--{boundary}--\r\n").as_bytes())
        .await?;
    writer.shutdown().await?;
    Ok(())
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
