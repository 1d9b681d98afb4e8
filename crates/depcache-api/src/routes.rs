//! Route definitions.

use axum::{Router, middleware::from_fn, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, index, proxy, status};
use crate::middleware::request_id;
use crate::state::AppState;

/// Create the application router.
///
/// Fixed routes take precedence; any other path is a proxied URL.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::health))
        .route("/api/status", get(status::status))
        .route("/{*url}", get(proxy::proxy))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn test_fixed_routes_win_over_proxy() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
