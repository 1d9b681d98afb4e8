//! HTML listing of the cache.

use axum::{extract::State, response::Html};
use std::fmt::Write;
use std::sync::Arc;

use crate::state::AppState;

const NAME_WIDTH: usize = 35;
const VALIDATOR_WIDTH: usize = 20;
const CHECKSUM_PREFIX: usize = 16;
/// Longest run of extensions `ellipsize` keeps intact.
const MAX_KEPT_EXTENSION: usize = 8;

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let entries = state.store.entries();

    let mut html = String::from(
        "<html><head><style>td { padding-right: 20px; }</style></head><body>",
    );
    let _ = writeln!(html, "Caching <b>{}</b> files:<br/><br/>", entries.len());
    html.push_str("<table style=\"font-family: monospace;\">");

    for entry in &entries {
        let url = escape(entry.source_url());
        let checksum: String = entry.checksum().chars().take(CHECKSUM_PREFIX).collect();

        html.push_str("<tr><td>[");
        let _ = write!(
            html,
            "<a href=\"{}\">cache</a>, ",
            escape(&state.store.cache_location(entry))
        );
        let _ = write!(html, "<a href=\"/{}\">recache</a>, ", url);
        let _ = write!(html, "<a href=\"{}\">source</a>", url);
        let _ = write!(
            html,
            "] <b>{}</b></td>",
            escape(&ellipsize(entry.display_name(), NAME_WIDTH))
        );
        let _ = write!(html, "<td>SHA:<br/><b>{}...</b></td>", escape(&checksum));
        let _ = writeln!(
            html,
            "<td>Modified:<br/><b>{}</b></td>",
            entry.stored_modified().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(html, "<td>Size:<br/><b>{}</b></td>", sizefmt(entry.size()));
        html.push_str("<td>");
        if let Some(validator) = entry.validator() {
            let _ = write!(
                html,
                "ETag:<br/><b>{}</b>",
                escape(&ellipsize(validator, VALIDATOR_WIDTH))
            );
        }
        html.push_str("</td></tr>");
    }

    html.push_str("</table></body></html>");
    Html(html)
}

/// Human-readable byte count, e.g. `4.0KB`.
pub fn sizefmt(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if num < 1024.0 {
            return format!("{:3.1}{}B", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1}YB", num)
}

/// Shorten `name` to `max_len` characters, keeping short extensions.
pub fn ellipsize(name: &str, max_len: usize) -> String {
    let total = name.chars().count();
    if total <= max_len {
        return name.to_string();
    }

    let mut stem = name;
    let mut ext_len = 0;
    while let Some((head, ext)) = split_extension(stem) {
        let len = ext.chars().count();
        if ext_len + len > MAX_KEPT_EXTENSION {
            break;
        }
        ext_len += len;
        stem = head;
    }

    let head: String = name
        .chars()
        .take(max_len.saturating_sub(3 + ext_len))
        .collect();
    let tail: String = name.chars().skip(total - ext_len).collect();
    format!("{}...{}", head, tail)
}

/// Split off the last extension, ignoring leading dots of the file name.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let base_start = name.rfind('/').map_or(0, |i| i + 1);
    let dot = name.rfind('.')?;
    if dot < base_start || name[base_start..dot].chars().all(|c| c == '.') {
        return None;
    }
    Some(name.split_at(dot))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{LOCAL_URL, test_app};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use depcache_cache::cache_key;
    use depcache_core::ObjectMetadata;
    use tower::ServiceExt;

    #[test]
    fn test_sizefmt() {
        assert_eq!(sizefmt(0), "0.0B");
        assert_eq!(sizefmt(512), "512.0B");
        assert_eq!(sizefmt(4096), "4.0KB");
        assert_eq!(sizefmt(5 * 1024 * 1024 + 512 * 1024), "5.5MB");
    }

    #[test]
    fn test_ellipsize_keeps_short_extensions() {
        assert_eq!(ellipsize("short.tar.gz", 35), "short.tar.gz");
        let name = "averyveryveryverylongpackagename-1.2.3.tar.gz";
        let short = ellipsize(name, 35);
        assert_eq!(short, "averyveryveryverylongpack....tar.gz");
        assert_eq!(short.chars().count(), 35);
    }

    #[test]
    fn test_ellipsize_without_extension() {
        assert_eq!(
            ellipsize("0123456789abcdef0123456789abcdef", 20),
            "0123456789abcdef0..."
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[tokio::test]
    async fn test_index_lists_entries() {
        let (app, state, objects) = test_app();
        objects
            .put_bytes(
                &cache_key(LOCAL_URL),
                vec![0u8; 4096],
                ObjectMetadata::new(LOCAL_URL, Some("abc123".to_string())),
            )
            .await;
        state.store.rebuild().await.unwrap();

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();

        assert!(html.contains("Caching <b>1</b> files"));
        assert!(html.contains(&format!("<a href=\"/{}\">recache</a>", LOCAL_URL)));
        assert!(html.contains("<b>tool-1.0.tar.gz</b>"));
        assert!(html.contains("4.0KB"));
        assert!(html.contains("ETag:<br/><b>abc123</b>"));
    }
}
