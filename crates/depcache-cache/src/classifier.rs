//! URL classification against the blacklist, greylist, and whitelist.

use depcache_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Suffix some SourceForge links carry; the file is identified without it.
const SOURCEFORGE_DOWNLOAD_SUFFIX: &str = "/download";

/// One approved origin path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRule {
    /// Host and path, e.g. `github.com/[^/]+/[^/]+/archive`. Unescaped dots
    /// match literally.
    pub pattern: String,
    /// Accept any sub-path below the pattern instead of exactly one
    /// trailing file segment.
    #[serde(default)]
    pub prefix_only: bool,
}

impl WhitelistRule {
    pub fn file(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            prefix_only: false,
        }
    }

    pub fn prefix(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            prefix_only: true,
        }
    }
}

/// The rule tables, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Regexes matched from the start of the URL; a match is rejected.
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
    /// Regexes matched from the start of the URL; a match always goes to
    /// the origin and is never cached.
    #[serde(default = "default_greylist")]
    pub greylist: Vec<String>,
    /// Ordered origin patterns eligible for caching.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<WhitelistRule>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            blacklist: default_blacklist(),
            greylist: default_greylist(),
            whitelist: default_whitelist(),
        }
    }
}

fn default_blacklist() -> Vec<String> {
    vec!["favicon.ico".to_string()]
}

fn default_greylist() -> Vec<String> {
    vec![".*/repomd.xml".to_string()]
}

fn default_whitelist() -> Vec<WhitelistRule> {
    [
        // Homebrew bottles
        "download.sf.net/project/machomebrew/Bottles",
        "homebrew.bintray.com/bottles",
        // WinRPM binaries
        r"download.opensuse.org/repositories/windows:/mingw:/win[\d]+/openSUSE_[\d\.]+/[^/]+",
        // Source tarballs
        "faculty.cse.tamu.edu/davis/SuiteSparse",
        "download.savannah.gnu.org/releases/libunwind",
        "github.com/[^/]+/[^/]+/archive",
        "github.com/[^/]+/[^/]+/releases/download/([^/]+)?",
        "api.github.com/repos/[^/]+/[^/]+/tarball",
        "gmplib.org/download/gmp",
        "mpfr.org/mpfr-current",
        r"mpfr.org/mpfr-[\d\.]+",
        r"nixos.org/releases/patchelf/patchelf-[\d\.]+",
        "kernel.org/pub/software/scm/git",
        "pypi.python.org/packages/source/v/virtualenv",
        r"llvm.org/releases/[\d\.]+",
        "math.sci.hiroshima-u.ac.jp/~m-mat/MT/SFMT",
        "agner.org/optimize",
        "netlib.org/lapack",
        "fftw.org",
        "unsis.googlecode.com/files",
        "intgat.tigress.co.uk/rmy/files/busybox",
        "frippery.org/files/busybox",
        "ftp.csx.cam.ac.uk/pub/software/programming/pcre",
        "bintray.com/artifact/download/[^/]+/generic",
        "imagemagick.org/download/binaries",
        "tls.mbed.org/download",
        "thrysoee.dk/editline",
        "ftp.atnf.csiro.au/pub/software/wcslib",
        // Unicode data
        "unicode.org/Public/UCD/latest/ucd/auxiliary",
        "unicode.org/Public/UNIDATA",
        r"unifoundry.com/pub/unifont-[\d\.]+/font-builds",
        // SourceForge
        "sourceforge.net/projects/pcre/files/pcre/[^/]+",
        "downloads.sourceforge.net/sevenzip",
        "sourceforge.net/projects/juliadeps-win/files",
        // mbedTLS DLL zips
        "api.github.com/repos/malmaud/malmaud.github.io/contents/files",
        "malmaud.github.io/files",
        // CMake binaries
        r"cmake.org/files/v[0-9\.]+",
    ]
    .into_iter()
    .map(WhitelistRule::file)
    .collect()
}

/// Why a URL is sent straight to its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    Greylisted,
    NotWhitelisted,
}

/// Outcome of classifying a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Blacklisted; answer "not found".
    Reject,
    /// Redirect to the origin without caching.
    Passthrough(PassthroughReason),
    /// Eligible for caching.
    Cacheable,
}

/// Compiled, ordered rule tables.
#[derive(Debug, Clone)]
pub struct UrlClassifier {
    blacklist: Vec<Regex>,
    greylist: Vec<Regex>,
    whitelist: Vec<Regex>,
}

impl UrlClassifier {
    /// Compile the rule tables. Any invalid pattern is a configuration error.
    pub fn new(rules: &ClassifierRules) -> Result<Self> {
        let anchored = |p: &String| compile(p, &format!("^(?:{})", p));
        Ok(Self {
            blacklist: rules.blacklist.iter().map(anchored).collect::<Result<_>>()?,
            greylist: rules.greylist.iter().map(anchored).collect::<Result<_>>()?,
            whitelist: rules
                .whitelist
                .iter()
                .map(|rule| compile(&rule.pattern, &whitelist_regex(rule)))
                .collect::<Result<_>>()?,
        })
    }

    /// Classifier over the built-in rule tables.
    pub fn builtin() -> Result<Self> {
        Self::new(&ClassifierRules::default())
    }

    /// Strip known-redundant URL suffixes.
    pub fn canonicalize(url: &str) -> &str {
        if url.contains("sourceforge")
            && let Some(stripped) = url.strip_suffix(SOURCEFORGE_DOWNLOAD_SUFFIX)
        {
            return stripped;
        }
        url
    }

    /// Classify a URL. The URL is canonicalized first.
    pub fn classify(&self, url: &str) -> Classification {
        let url = Self::canonicalize(url);
        if self.blacklist.iter().any(|re| re.is_match(url)) {
            return Classification::Reject;
        }
        if self.greylist.iter().any(|re| re.is_match(url)) {
            return Classification::Passthrough(PassthroughReason::Greylisted);
        }
        if self.whitelist.iter().any(|re| re.is_match(url)) {
            return Classification::Cacheable;
        }
        Classification::Passthrough(PassthroughReason::NotWhitelisted)
    }

    pub fn rule_count(&self) -> usize {
        self.blacklist.len() + self.greylist.len() + self.whitelist.len()
    }
}

fn compile(pattern: &str, regex: &str) -> Result<Regex> {
    Regex::new(regex).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn whitelist_regex(rule: &WhitelistRule) -> String {
    let body = escape_dots(&rule.pattern);
    if rule.prefix_only {
        format!(r"^(?:https?|ftp)://(?:www\.)?{}(?:/.*)?$", body)
    } else {
        format!(r"^(?:https?|ftp)://(?:www\.)?{}/[^/]+$", body)
    }
}

/// Escape every `.` not already escaped.
fn escape_dots(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut escaped = false;
    for c in pattern.chars() {
        if c == '.' && !escaped {
            out.push('\\');
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> UrlClassifier {
        UrlClassifier::builtin().unwrap()
    }

    #[test]
    fn test_blacklist_rejects() {
        assert_eq!(classifier().classify("favicon.ico"), Classification::Reject);
    }

    #[test]
    fn test_greylist_beats_whitelist() {
        let c = UrlClassifier::new(&ClassifierRules {
            whitelist: vec![WhitelistRule::file("download.opensuse.org/repositories/repodata")],
            ..Default::default()
        })
        .unwrap();
        let url = "https://download.opensuse.org/repositories/repodata/repomd.xml";
        assert_eq!(
            c.classify(url),
            Classification::Passthrough(PassthroughReason::Greylisted)
        );
    }

    #[test]
    fn test_github_archive_is_cacheable() {
        let c = classifier();
        assert_eq!(
            c.classify("https://github.com/foo/bar/archive/v1.0.tar.gz"),
            Classification::Cacheable
        );
        assert_eq!(
            c.classify("https://www.github.com/foo/bar/archive/v1.0.tar.gz"),
            Classification::Cacheable
        );
        assert_eq!(
            c.classify("https://github.com/foo/bar/releases/download/v1.0/bar-linux.tar.gz"),
            Classification::Cacheable
        );
    }

    #[test]
    fn test_unknown_host_passes_through() {
        assert_eq!(
            classifier().classify("https://example.com/files/thing.tar.gz"),
            Classification::Passthrough(PassthroughReason::NotWhitelisted)
        );
    }

    #[test]
    fn test_sub_path_is_not_a_file_match() {
        assert_eq!(
            classifier().classify("https://fftw.org/pub/fftw/fftw-3.3.6.tar.gz"),
            Classification::Passthrough(PassthroughReason::NotWhitelisted)
        );
        assert_eq!(
            classifier().classify("http://fftw.org/fftw-3.3.6.tar.gz"),
            Classification::Cacheable
        );
    }

    #[test]
    fn test_dots_match_literally() {
        assert_eq!(
            classifier().classify("https://fftwXorg/fftw-3.3.6.tar.gz"),
            Classification::Passthrough(PassthroughReason::NotWhitelisted)
        );
    }

    #[test]
    fn test_prefix_only_rule() {
        let c = UrlClassifier::new(&ClassifierRules {
            whitelist: vec![WhitelistRule::prefix("mirror.example.org/pub")],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            c.classify("ftp://mirror.example.org/pub/a/b/c.tar.gz"),
            Classification::Cacheable
        );
        assert_eq!(
            c.classify("ftp://mirror.example.org/public/c.tar.gz"),
            Classification::Passthrough(PassthroughReason::NotWhitelisted)
        );
    }

    #[test]
    fn test_sourceforge_download_suffix_stripped() {
        let url = "https://downloads.sourceforge.net/sevenzip/7z920.exe/download";
        assert_eq!(
            UrlClassifier::canonicalize(url),
            "https://downloads.sourceforge.net/sevenzip/7z920.exe"
        );
        assert_eq!(classifier().classify(url), Classification::Cacheable);
        assert_eq!(
            UrlClassifier::canonicalize("https://example.com/a/download"),
            "https://example.com/a/download"
        );
    }

    #[test]
    fn test_classify_is_idempotent() {
        let c = classifier();
        for url in [
            "favicon.ico",
            "https://github.com/foo/bar/archive/v1.0.tar.gz",
            "https://example.com/x",
        ] {
            assert_eq!(c.classify(url), c.classify(url));
            assert_eq!(c.classify(url), c.classify(UrlClassifier::canonicalize(url)));
        }
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = UrlClassifier::new(&ClassifierRules {
            greylist: vec!["(".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_escape_dots() {
        assert_eq!(escape_dots("a.b"), r"a\.b");
        assert_eq!(escape_dots(r"v[\d\.]+"), r"v[\d\.]+");
    }
}
