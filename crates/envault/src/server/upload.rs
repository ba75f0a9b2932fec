//! Upload pipeline: multipart parsing, size gates, id allocation, streaming
//! encryption, and compensating cleanup.
//!
//! The request body must contain, in order, a `file-size` form field (8-byte
//! little-endian declared plaintext size) and then the file part. The DB row
//! is written before the disk blob, so the file id acts as the reservation;
//! on any later failure both are removed best-effort.

use std::io;
use std::path::Path;

use axum::extract::multipart::{Field, Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::error::ApiErrorCode;
use common::protocol::{ErrorHolder, UploadResponse};
use futures_util::TryStreamExt;
use http_body_util::LengthLimitError;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::limit::{chain_contains, DeclaredSizeExceeded, DeclaredSizeReader};
use super::reply;
use super::state::AppState;
use crate::crypto::CryptoError;
use crate::db::StoreError;

/// Longest accepted original filename, in UTF-8 bytes.
const MAX_FILENAME_LEN: usize = 255;

/// `POST /api/upload` — encrypt and store a file from a multipart body.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    if !is_multipart_form(&headers) {
        warn!("unsupported media type on upload");
        return reply::error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiErrorCode::InvalidContentFormat,
            "unsupported media type; expected multipart/form-data",
        );
    }

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            error!(error = %rejection, "invalid multipart form");
            return reply::error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorCode::InvalidContentFormat,
                "invalid multipart form",
            );
        }
    };

    // First part: the declared plaintext size.
    let field = match next_part(&mut multipart).await {
        Ok(field) => field,
        Err(response) => return response,
    };
    if field.name() != Some("file-size") {
        error!("first multipart part is not file-size");
        return reply::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidContentFormat,
            "file-size is not provided",
        );
    }
    let declared_size = match read_declared_size(field).await {
        Ok(size) => size,
        Err(response) => return response,
    };
    debug!(declared_size, "read file-size");
    if declared_size == 0 || declared_size > state.max_upload_size {
        error!(
            declared_size,
            max_upload_size = state.max_upload_size,
            "file-size is not in valid range"
        );
        return reply::param_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::ParameterOutOfRange,
            "file_size",
            "file-size is not in valid range",
        );
    }

    // Second part: the file itself.
    let field = match next_part(&mut multipart).await {
        Ok(field) => field,
        Err(response) => return response,
    };
    let filename = match field.file_name() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => {
            error!("expected file part but found a different form part");
            return reply::error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorCode::InvalidContentFormat,
                "expected a file part with a filename",
            );
        }
    };
    if filename.len() > MAX_FILENAME_LEN {
        error!(filename_len = filename.len(), "file name is too long");
        return reply::param_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::ParameterOutOfRange,
            "file_name",
            "file name is too long",
        );
    }

    let encrypted_filename = match state.crypter.encrypt_filename(&filename).await {
        Ok(encrypted) => encrypted,
        Err(err) => {
            error!(error = ?err, "could not encrypt file name");
            return reply::error(
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::InternalApiError,
                "",
            );
        }
    };

    // Allocate the file id; regenerate on the (vanishingly rare) collision.
    let file_id = loop {
        let candidate = Uuid::new_v4().to_string();
        match state.store.add_file(&candidate, &encrypted_filename).await {
            Ok(()) => break candidate,
            Err(StoreError::UniqueViolation { ref table, ref column })
                if table == "files" && column == "generated_name" =>
            {
                warn!(id = %candidate, "generated file id collided; retrying");
                continue;
            }
            Err(err) => {
                error!(error = ?err, "could not save file record");
                return reply::error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiErrorCode::InternalApiError,
                    "",
                );
            }
        }
    };

    let path = state.storage_dir.join(&file_id);
    match store_encrypted(&state, &path, field, declared_size).await {
        Ok(()) => {
            let body = UploadResponse {
                id: Some(file_id),
                file_name: Some(filename),
                errors: ErrorHolder::default(),
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(err) => {
            error!(error = ?err, id = %file_id, "could not save encrypted file");
            let response = if chain_contains::<DeclaredSizeExceeded>(&err) {
                reply::error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiErrorCode::TooBigContentSize,
                    "file body exceeds the declared file-size",
                )
            } else if chain_contains::<LengthLimitError>(&err) {
                reply::error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiErrorCode::TooBigContentSize,
                    "multipart content exceeds max upload size",
                )
            } else {
                reply::error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiErrorCode::InternalApiError,
                    "",
                )
            };

            // Best-effort compensation: drop the row, then the blob. Neither
            // failure changes the response already chosen above.
            if let Err(err) = state.store.remove_file(&file_id).await {
                error!(error = ?err, id = %file_id, "could not remove incomplete file record");
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(error = %err, id = %file_id, "could not remove incomplete file from disk");
            }

            response
        }
    }
}

fn is_multipart_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|media_type| {
            media_type.type_() == mime::MULTIPART && media_type.subtype() == mime::FORM_DATA
        })
        .unwrap_or(false)
}

async fn next_part<'a>(multipart: &'a mut Multipart) -> Result<Field<'a>, Response> {
    match multipart.next_field().await {
        Ok(Some(field)) => Ok(field),
        Ok(None) => {
            error!("multipart body ended before the expected part");
            Err(reply::error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorCode::InvalidContentFormat,
                "multipart body is missing a required part",
            ))
        }
        Err(err) => Err(multipart_failure(err)),
    }
}

async fn read_declared_size(field: Field<'_>) -> Result<u64, Response> {
    let bytes = match field.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return Err(multipart_failure(err)),
    };
    let bytes: [u8; 8] = match bytes.as_ref().try_into() {
        Ok(bytes) => bytes,
        Err(_) => {
            error!(len = bytes.len(), "file-size body has the wrong length");
            return Err(reply::error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorCode::UnexpectedEof,
                "file-size must be an 8-byte little-endian integer",
            ));
        }
    };
    Ok(u64::from_le_bytes(bytes))
}

fn multipart_failure(err: MultipartError) -> Response {
    error!(error = %err, "could not read multipart part");
    if chain_contains::<LengthLimitError>(&err) {
        reply::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::TooBigContentSize,
            "multipart content exceeds max upload size",
        )
    } else {
        reply::error(
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidContentFormat,
            "invalid multipart form",
        )
    }
}

/// Stream the file part through the crypter into `path`, bounded by the
/// declared size.
async fn store_encrypted(
    state: &AppState,
    path: &Path,
    field: Field<'_>,
    declared_size: u64,
) -> Result<(), CryptoError> {
    let stream = field.map_err(io::Error::other);
    let reader = Box::pin(StreamReader::new(stream));
    let mut limited = DeclaredSizeReader::new(reader, declared_size);

    let file = File::create(path).await?;
    let mut writer = BufWriter::new(file);
    state.crypter.encrypt_and_copy(&mut writer, &mut limited).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::super::router;
    use super::super::testkit::{self, BOUNDARY};
    use super::*;

    async fn send(
        state: AppState,
        content_type: &str,
        body: Vec<u8>,
    ) -> axum::response::Response {
        let app = router::build(state, None);
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    fn multipart_content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    #[tokio::test]
    async fn happy_path_stores_a_decryptable_file() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let content = b"some test content";
        let body = testkit::upload_body(&17u64.to_le_bytes(), "test_stuff.txt", content);

        let response = send(state.clone(), &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let value = testkit::body_json(response).await;
        let id = value["id"].as_str().unwrap().to_owned();
        assert_eq!(value["file_name"], "test_stuff.txt");
        assert!(value.get("errors").is_none());
        assert!(Uuid::parse_str(&id).is_ok());

        // The blob decrypts back to exactly the uploaded bytes.
        let frame = std::fs::read(state.storage_dir.join(&id)).unwrap();
        let mut plaintext = Vec::new();
        let mut reader = frame.as_slice();
        state
            .crypter
            .decrypt_and_copy(&mut plaintext, &mut reader)
            .await
            .unwrap();
        assert_eq!(plaintext, content);

        // And the metadata row resolves to the original filename.
        let encrypted = state.store.file_name(&id).await.unwrap().unwrap();
        let name = state.crypter.decrypt_filename(&encrypted).await.unwrap();
        assert_eq!(name, "test_stuff.txt");
    }

    #[tokio::test]
    async fn lied_size_is_rejected_and_compensated() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let body = testkit::upload_body(&6u64.to_le_bytes(), "test_stuff.txt", b"1234567890");

        let response = send(state.clone(), &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 4);

        // Neither the row nor the blob survive.
        assert_eq!(state.store.file_count().await.unwrap(), 0);
        let leftovers: Vec<_> = std::fs::read_dir(state.storage_dir.as_path())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn wrong_media_type_is_415() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let response = send(state, "text/plain", b"hello".to_vec()).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 2);
    }

    #[tokio::test]
    async fn declared_size_above_cap_is_out_of_range() {
        let (state, _tmp) = testkit::test_state(512).await;
        let body = testkit::upload_body(&1024u64.to_le_bytes(), "big.bin", b"x");

        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 5);
        assert_eq!(value["errors"][0]["parameter_name"], "file_size");
    }

    #[tokio::test]
    async fn zero_declared_size_is_out_of_range() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let body = testkit::upload_body(&0u64.to_le_bytes(), "empty.txt", b"");
        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 5);
    }

    #[tokio::test]
    async fn misnamed_first_part_is_rejected() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let body = [
            format!("--{BOUNDARY}\r\n"),
            "Content-Disposition: form-data; name=\"size\"\r\n\r\n".to_owned(),
            "12345678\r\n".to_owned(),
            format!("--{BOUNDARY}--\r\n"),
        ]
        .concat()
        .into_bytes();

        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 2);
    }

    #[tokio::test]
    async fn short_file_size_body_is_unexpected_eof() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let body = testkit::upload_body(&[17, 0, 0, 0], "short.txt", b"data");
        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 3);
    }

    #[tokio::test]
    async fn second_part_without_filename_is_rejected() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let mut body = Vec::new();
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file-size\"\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(&5u64.to_le_bytes());
        body.extend_from_slice(
            format!(
                "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
            )
            .as_bytes(),
        );

        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 2);
    }

    #[tokio::test]
    async fn overlong_filename_is_out_of_range() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let long_name = "n".repeat(300);
        let body = testkit::upload_body(&4u64.to_le_bytes(), &long_name, b"data");
        let response = send(state, &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 5);
        assert_eq!(value["errors"][0]["parameter_name"], "file_name");
    }

    #[tokio::test]
    async fn body_over_the_server_cap_is_rejected() {
        let (state, _tmp) = testkit::test_state(64).await;
        let body = testkit::upload_body(&32u64.to_le_bytes(), "big.bin", &[0u8; 256]);
        let response = send(state.clone(), &multipart_content_type(), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // Whatever gate fired, no partial state may survive.
        assert_eq!(state.store.file_count().await.unwrap(), 0);
    }
}
