//! Registration and login handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::error::AuthErrorCode;
use common::protocol::{AuthError, AuthRequest, AuthResponse};
use tracing::{error, info};

use super::state::AppState;
use crate::db::StoreError;

/// `POST /api/register` — create a user account.
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!(error = %rejection, "invalid register request body");
            return auth_error(
                StatusCode::BAD_REQUEST,
                AuthErrorCode::InvalidContentFormat,
                "invalid json",
            );
        }
    };

    let password = request.password;
    let hash = match tokio::task::spawn_blocking(move || {
        bcrypt::hash(password, bcrypt::DEFAULT_COST)
    })
    .await
    {
        Ok(Ok(hash)) => hash,
        Ok(Err(err)) => {
            error!(error = %err, "could not hash password");
            return auth_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                AuthErrorCode::InvalidCredentials,
                "bad password",
            );
        }
        Err(err) => {
            error!(error = %err, "password hashing task failed");
            return auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            );
        }
    };

    match state.store.add_user(&request.name, hash.as_bytes()).await {
        Ok(_) => {
            info!(name = %request.name, "registered new user");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::UniqueViolation { .. }) => {
            error!(name = %request.name, "user name already used");
            auth_error(
                StatusCode::CONFLICT,
                AuthErrorCode::InvalidCredentials,
                "name already used",
            )
        }
        Err(err) => {
            error!(error = ?err, "could not save user");
            auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            )
        }
    }
}

/// `POST /api/login` — verify credentials and issue a session token.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!(error = %rejection, "invalid login request body");
            return auth_error(
                StatusCode::BAD_REQUEST,
                AuthErrorCode::InvalidContentFormat,
                "invalid json",
            );
        }
    };

    let user = match state.store.user_by_name(&request.name).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return auth_error(
                StatusCode::UNAUTHORIZED,
                AuthErrorCode::InvalidCredentials,
                "invalid credentials",
            );
        }
        Err(err) => {
            error!(error = ?err, "could not read user record");
            return auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            );
        }
    };

    let stored_hash = match String::from_utf8(user.password_hash) {
        Ok(hash) => hash,
        Err(_) => {
            error!(user_id = user.id, "stored password hash is not valid UTF-8");
            return auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            );
        }
    };

    let password = request.password;
    let verified = match tokio::task::spawn_blocking(move || {
        bcrypt::verify(password, &stored_hash)
    })
    .await
    {
        Ok(Ok(verified)) => verified,
        Ok(Err(err)) => {
            error!(error = %err, "could not verify password hash");
            return auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            );
        }
        Err(err) => {
            error!(error = %err, "password verification task failed");
            return auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            );
        }
    };
    if !verified {
        return auth_error(
            StatusCode::UNAUTHORIZED,
            AuthErrorCode::InvalidCredentials,
            "invalid credentials",
        );
    }

    match state.auth_keys.issue(user.id) {
        Ok(token) => {
            let body = AuthResponse {
                session_token: Some(token),
                errors: Vec::new(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!(error = %err, "could not create session token");
            auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                AuthErrorCode::InternalApiError,
                "",
            )
        }
    }
}

fn auth_error(status: StatusCode, code: AuthErrorCode, description: &str) -> Response {
    let body = AuthResponse {
        session_token: None,
        errors: vec![AuthError {
            code,
            description: (!description.is_empty()).then(|| description.to_owned()),
        }],
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::super::router;
    use super::super::testkit;
    use super::*;

    async fn send(state: AppState, path: &str, body: &str) -> Response {
        let app = router::build(state, None);
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn register_then_login_issues_a_token() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let credentials = r#"{"name":"alice","password":"correct horse"}"#;

        let response = send(state.clone(), "/api/register", credentials).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(state, "/api/login", credentials).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = testkit::body_json(response).await;
        let token = value["session_token"].as_str().unwrap();
        assert_eq!(token.split('.').count(), 3, "expected a JWT");
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let credentials = r#"{"name":"bob","password":"pw"}"#;
        send(state.clone(), "/api/register", credentials).await;

        let response = send(state, "/api/register", credentials).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 5);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (state, _tmp) = testkit::test_state(1024).await;
        send(
            state.clone(),
            "/api/register",
            r#"{"name":"carol","password":"right"}"#,
        )
        .await;

        let response = send(
            state,
            "/api/login",
            r#"{"name":"carol","password":"wrong"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 5);
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let response = send(state, "/api/login", r#"{"name":"ghost","password":"x"}"#).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let response = send(state, "/api/register", "{oops").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 2);
    }
}
