//! Proxied download requests.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use depcache_cache::{Decision, RedirectKind};
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

const SCHEMES: [&str; 3] = ["https:", "http:", "ftp:"];

/// `GET /<url>`: redirect to the cache or the origin.
pub async fn proxy(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let Some(url) = requested_url(&uri) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    into_response(state.handler.handle(&url).await)
}

/// The URL a request asks for: its raw path minus the leading slash.
///
/// The query string is not part of it. Proxies and clients that merge
/// slashes turn `https://host` into `https:/host`; that is undone here.
pub fn requested_url(uri: &Uri) -> Option<String> {
    let path = uri.path().strip_prefix('/')?;
    if path.is_empty() {
        return None;
    }
    Some(restore_scheme_separator(path))
}

fn restore_scheme_separator(url: &str) -> String {
    for scheme in SCHEMES {
        if let Some(rest) = url.strip_prefix(scheme)
            && let Some(host) = rest.strip_prefix('/')
            && !host.starts_with('/')
        {
            return format!("{}//{}", scheme, host);
        }
    }
    url.to_string()
}

fn into_response(decision: Decision) -> Response {
    match decision {
        Decision::NotFound => StatusCode::NOT_FOUND.into_response(),
        Decision::Redirect { location, kind } => {
            let status = match kind {
                RedirectKind::Permanent => StatusCode::MOVED_PERMANENTLY,
                RedirectKind::Temporary => StatusCode::FOUND,
            };
            match HeaderValue::from_str(&location) {
                Ok(value) => (status, [(header::LOCATION, value)]).into_response(),
                Err(e) => {
                    warn!(location = %location, error = %e, "Unusable redirect target");
                    StatusCode::BAD_REQUEST.into_response()
                }
            }
        }
    }
}
