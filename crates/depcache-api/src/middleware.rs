//! HTTP middleware.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag each request and its response with a request ID.
///
/// An ID supplied by the client is kept.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let request_id = match request.headers().get(REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(value) => {
                request
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, value.clone());
                value
            }
            Err(_) => return next.run(request).await,
        },
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}
