//! Origin response types.

use chrono::{DateTime, Utc};

/// Headers of interest returned by a HEAD probe against the origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    /// ETag with quotes stripped.
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

/// Result of downloading an origin file to local scratch storage.
///
/// A non-2xx status is reported here rather than as an error; the caller
/// decides what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginDownload {
    pub status: u16,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Bytes written to the destination file.
    pub size: u64,
}

impl OriginDownload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Whether a Content-Type header names an HTML document.
///
/// Parameters such as `charset` are ignored.
pub fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}
