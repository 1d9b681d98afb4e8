//! Origin fixtures.

use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A fake origin server on localhost.
///
/// Paths under `/files` are cacheable by the proxy started with
/// [`crate::ProxyOptions::default`].
pub struct OriginFixture {
    pub server: MockServer,
}

impl OriginFixture {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Serve a file for GET and its headers for HEAD.
    pub async fn serve_file(&self, file_path: &str, body: Vec<u8>, etag: &str) {
        self.serve_head(file_path, etag).await;
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(file_response(body, etag))
            .mount(&self.server)
            .await;
    }

    /// Like [`OriginFixture::serve_file`], with a delayed GET.
    pub async fn serve_slow_file(&self, file_path: &str, body: Vec<u8>, etag: &str, delay: Duration) {
        self.serve_head(file_path, etag).await;
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(file_response(body, etag).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_head(&self, file_path: &str, etag: &str) {
        Mock::given(method("HEAD"))
            .and(path(file_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", format!("\"{}\"", etag).as_str())
                    .insert_header("content-type", "application/x-gzip"),
            )
            .mount(&self.server)
            .await;
    }

    /// HEAD that answers only after `delay`.
    pub async fn serve_slow_head(&self, file_path: &str, delay: Duration) {
        Mock::given(method("HEAD"))
            .and(path(file_path))
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Serve an HTML page where a file is expected.
    pub async fn serve_html(&self, file_path: &str) {
        let page = format!("<html><body>{}</body></html>", "mirror list ".repeat(400));
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page, "text/html; charset=utf-8"))
            .mount(&self.server)
            .await;
    }

    /// Number of requests the origin received for `method` and `path`.
    pub async fn request_count(&self, http_method: &str, file_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == file_path)
            .count()
    }

    pub async fn total_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .len()
    }
}

fn file_response(body: Vec<u8>, etag: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("etag", format!("\"{}\"", etag).as_str())
        .insert_header("content-type", "application/x-gzip")
        .set_body_bytes(body)
}

/// Binary payload of `len` bytes.
pub fn archive_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
