//! Axum router construction.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::{auth, download, reply, state::AppState, upload};

/// Build the application [`Router`] with all routes and middleware attached.
///
/// `request_timeout` bounds the time a handler may take to produce response
/// headers; `None` leaves requests unbounded.
pub fn build(state: AppState, request_timeout: Option<Duration>) -> Router {
    let mut router = Router::new()
        .route("/api/upload", post(upload::upload))
        .route("/api/download", post(download::download))
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .layer(DefaultBodyLimit::max(state.max_upload_size as usize))
        .fallback(reply::not_found)
        .layer(TraceLayer::new_for_http());

    if let Some(timeout) = request_timeout {
        router = router.layer(TimeoutLayer::new(timeout));
    }

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::super::testkit;
    use super::*;

    #[tokio::test]
    async fn unknown_route_returns_404_with_code() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let app = build(state, None);
        let request = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let value = testkit::body_json(response).await;
        assert_eq!(value["errors"][0]["code"], 6);
    }

    #[tokio::test]
    async fn upload_route_rejects_get() {
        let (state, _tmp) = testkit::test_state(1024).await;
        let app = build(state, None);
        let request = Request::builder()
            .method("GET")
            .uri("/api/upload")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
