//! HTTP origin client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depcache_core::object::strip_quotes;
use depcache_core::{Error, Origin, OriginDownload, ProbeResponse, Result};
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap, HeaderName, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Timeouts and identity for origin requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Timeout for revalidation HEAD probes, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Timeout for a whole download, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_download_timeout_secs() -> u64 {
    1800
}

fn default_user_agent() -> String {
    format!("depcache/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            download_timeout_secs: default_download_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// [`Origin`] implementation over reqwest. Redirects are followed.
pub struct HttpOrigin {
    client: reqwest::Client,
    probe_timeout: Duration,
    download_timeout: Duration,
}

impl HttpOrigin {
    pub fn new(config: &OriginConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        })
    }
}

fn header(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn etag(headers: &HeaderMap) -> Option<String> {
    header(headers, ETAG).map(|v| strip_quotes(&v).to_string())
}

/// Parse an HTTP-date (`Tue, 10 Jan 2017 12:00:00 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn probe(&self, url: &str) -> Result<ProbeResponse> {
        let response = self
            .client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HEAD {}: {}", url, e)))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::Origin(format!("Received HTTP {} for {}", status, url)));
        }

        let headers = response.headers();
        Ok(ProbeResponse {
            status,
            etag: etag(headers),
            last_modified: header(headers, LAST_MODIFIED).and_then(|v| parse_http_date(&v)),
            content_type: header(headers, CONTENT_TYPE),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<OriginDownload> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        let etag = etag(response.headers());
        let content_type = header(response.headers(), CONTENT_TYPE);
        if !status.is_success() {
            return Ok(OriginDownload {
                status: status.as_u16(),
                etag,
                content_type,
                size: 0,
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut size = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Network(format!("GET {}: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url = %url, size, "Downloaded origin file");

        Ok(OriginDownload {
            status: status.as_u16(),
            etag,
            content_type,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn origin() -> HttpOrigin {
        HttpOrigin::new(&OriginConfig {
            probe_timeout_ms: 300,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_http_date() {
        assert_eq!(
            parse_http_date("Tue, 10 Jan 2017 12:00:00 GMT"),
            Some(Utc.with_ymd_and_hms(2017, 1, 10, 12, 0, 0).unwrap())
        );
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[tokio::test]
    async fn test_probe_reads_validators() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/files/tool.tar.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc123\"")
                    .insert_header("last-modified", "Tue, 10 Jan 2017 12:00:00 GMT")
                    .insert_header("content-type", "application/x-gzip"),
            )
            .mount(&server)
            .await;

        let probe = origin()
            .probe(&format!("{}/files/tool.tar.gz", server.uri()))
            .await
            .unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.etag.as_deref(), Some("abc123"));
        assert_eq!(
            probe.last_modified,
            Some(Utc.with_ymd_and_hms(2017, 1, 10, 12, 0, 0).unwrap())
        );
        assert_eq!(probe.content_type.as_deref(), Some("application/x-gzip"));
    }

    #[tokio::test]
    async fn test_probe_non_200_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = origin()
            .probe(&format!("{}/files/tool.tar.gz", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Origin(_)));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let result = origin()
            .probe(&format!("{}/files/slow.tar.gz", server.uri()))
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/tool.tar.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .insert_header("content-type", "application/x-gzip")
                    .set_body_bytes(vec![42u8; 5000]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("download");
        let download = origin()
            .download(&format!("{}/files/tool.tar.gz", server.uri()), &dest)
            .await
            .unwrap();

        assert!(download.is_success());
        assert_eq!(download.size, 5000);
        assert_eq!(download.etag.as_deref(), Some("v1"));
        assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 5000);
    }

    #[tokio::test]
    async fn test_download_error_status_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let download = origin()
            .download(&format!("{}/missing.tar.gz", server.uri()), &dir.path().join("d"))
            .await
            .unwrap();
        assert_eq!(download.status, 404);
        assert!(!download.is_success());
    }
}
