//! Cache key and display name derivation.

use sha2::{Digest, Sha256};

/// Split a URL into its directory part and final segment.
///
/// `https://h/a/f.zip` splits into `https://h/a` and `f.zip`.
fn split_url(url: &str) -> (&str, &str) {
    match url.rfind('/') {
        Some(idx) => (&url[..idx], &url[idx + 1..]),
        None => ("", url),
    }
}

/// Derive the object store key for a source URL.
///
/// The directory part is hashed so that files sharing a basename under
/// different paths land under different prefixes. `+` in the basename
/// becomes a space: origins encode spaces as `+`, the store keeps spaces.
pub fn cache_key(url: &str) -> String {
    let (dir, base) = split_url(url);
    let hash = hex::encode(Sha256::digest(dir.as_bytes()));
    format!("{}/{}", hash, base.replace('+', " "))
}

/// Derive a human-meaningful file name for a source URL.
///
/// GitHub archive and tarball downloads end in a bare ref (`v1.0.tar.gz`),
/// so the repository name is prepended: `bar-v1.0.tar.gz`.
pub fn display_name(url: &str) -> String {
    let (dir, base) = split_url(url);
    let (grand, parent) = split_url(dir);
    if url.contains("github") && matches!(parent, "archive" | "tarball") {
        let (_, repo) = split_url(grand);
        return format!("{}-{}", repo, base);
    }
    base.to_string()
}

/// Scheme of a URL, lowercased, if it has one.
pub fn scheme(url: &str) -> Option<String> {
    url.split_once("://").map(|(s, _)| s.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_deterministic() {
        let url = "https://ftp.gnu.org/gnu/gmp/gmp-6.1.2.tar.xz";
        assert_eq!(cache_key(url), cache_key(url));
    }

    #[test]
    fn test_cache_key_namespaces_directories() {
        let a = cache_key("https://h/a/f.zip");
        let b = cache_key("https://h/b/f.zip");
        assert_ne!(a, b);
        assert!(a.ends_with("/f.zip"));
        assert!(b.ends_with("/f.zip"));
    }

    #[test]
    fn test_cache_key_layout() {
        let key = cache_key("https://h/a/f.zip");
        let (hash, name) = key.split_once('/').unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, "f.zip");
    }

    #[test]
    fn test_cache_key_plus_becomes_space() {
        let key = cache_key("https://h/dl/libfoo+bar-1.0.zip");
        assert!(key.ends_with("/libfoo bar-1.0.zip"));
    }

    #[test]
    fn test_display_name_github_archive() {
        assert_eq!(
            display_name("https://github.com/foo/bar/archive/v1.0.tar.gz"),
            "bar-v1.0.tar.gz"
        );
        assert_eq!(
            display_name("https://api.github.com/repos/foo/bar/tarball/v2.3"),
            "bar-v2.3"
        );
    }

    #[test]
    fn test_display_name_default() {
        assert_eq!(
            display_name("https://github.com/foo/bar/releases/download/v1.0/bar.zip"),
            "bar.zip"
        );
        assert_eq!(
            display_name("https://example.com/archive/v1.0.tar.gz"),
            "v1.0.tar.gz"
        );
    }

    #[test]
    fn test_scheme() {
        assert_eq!(scheme("FTP://host/f").as_deref(), Some("ftp"));
        assert_eq!(scheme("https://host/f").as_deref(), Some("https"));
        assert_eq!(scheme("favicon.ico"), None);
    }
}
