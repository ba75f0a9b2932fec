//! Request and response bodies exchanged over the public HTTP API.

use serde::{Deserialize, Serialize};

use crate::error::{ApiErrorCode, AuthErrorCode};

// ---------------------------------------------------------------------------
// File API
// ---------------------------------------------------------------------------

/// One error entry in an API response body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiError {
    /// Stable numeric code; see [`ApiErrorCode`].
    pub code: ApiErrorCode,
    /// Name of the offending request parameter, when one is implicated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameter_name: Option<String>,
    /// Human-readable description safe to expose to callers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

/// List of errors embedded in every API response body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorHolder {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ApiError>,
}

impl ErrorHolder {
    /// Append an error entry with a code and description.
    pub fn push(&mut self, code: ApiErrorCode, description: impl Into<String>) {
        self.errors.push(ApiError {
            code,
            parameter_name: None,
            description: Some(description.into()),
        });
    }

    /// Append an error entry naming the offending parameter.
    pub fn push_param(
        &mut self,
        code: ApiErrorCode,
        parameter: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.errors.push(ApiError {
            code,
            parameter_name: Some(parameter.into()),
            description: Some(description.into()),
        });
    }
}

/// Response body for `POST /api/upload`.
///
/// On success `id` and `file_name` are set and `errors` is omitted; on
/// failure only `errors` is present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UploadResponse {
    /// Opaque identifier assigned to the stored file.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// The original (client-supplied) file name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_name: Option<String>,
    #[serde(flatten)]
    pub errors: ErrorHolder,
}

/// Request body for `POST /api/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    /// The file id returned by a previous upload.
    pub id: String,
}

// ---------------------------------------------------------------------------
// Auth API
// ---------------------------------------------------------------------------

/// Request body for `POST /api/register` and `POST /api/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub name: String,
    pub password: String,
}

/// One error entry in an auth response body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthError {
    pub code: AuthErrorCode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

/// Response body for `POST /api/login`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthResponse {
    /// HS256 JWT granting access for the configured time-to-live.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<AuthError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_success_omits_errors() {
        let resp = UploadResponse {
            id: Some("abc".into()),
            file_name: Some("notes.txt".into()),
            errors: ErrorHolder::default(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"id":"abc","file_name":"notes.txt"}"#);
    }

    #[test]
    fn upload_error_omits_id() {
        let mut resp = UploadResponse::default();
        resp.errors.push(ApiErrorCode::TooBigContentSize, "too big");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"errors":[{"code":4,"description":"too big"}]}"#);
    }

    #[test]
    fn param_error_carries_parameter_name() {
        let mut holder = ErrorHolder::default();
        holder.push_param(ApiErrorCode::ParameterOutOfRange, "file_size", "out of range");
        let json = serde_json::to_string(&holder).unwrap();
        assert!(json.contains(r#""parameter_name":"file_size""#));
    }

    #[test]
    fn file_request_round_trip() {
        let req: FileRequest =
            serde_json::from_str(r#"{"id":"00000000-0000-0000-0000-000000000000"}"#).unwrap();
        assert_eq!(req.id, "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn auth_response_round_trip() {
        let resp = AuthResponse {
            session_token: Some("tok".into()),
            errors: Vec::new(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"session_token":"tok"}"#);
        let back: AuthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_token.as_deref(), Some("tok"));
    }
}
