//! Server configuration.

use anyhow::Context;
use depcache_cache::{ClassifierRules, FetchConfig, OriginConfig, S3Settings, StoreConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Filesystem,
    Memory,
}

/// Where cached files are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    /// Falls back to `AWS_ACCESS_KEY_ID`.
    pub access_key_id: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY`.
    pub secret_access_key: Option<String>,
    /// Falls back to `AWS_SESSION_TOKEN`.
    pub session_token: Option<String>,
    /// Root directory of the filesystem backend.
    pub root_dir: PathBuf,
    /// Public URL clients download cached files from. Derived from the
    /// bucket when unset.
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: "depcache".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            root_dir: PathBuf::from("./depcache-data"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    pub fn public_base_url(&self) -> String {
        if let Some(url) = &self.public_base_url {
            return url.clone();
        }
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.amazonaws.com/", self.bucket),
        }
    }

    pub fn s3_settings(&self) -> S3Settings {
        self.s3_settings_with(|name| std::env::var(name).ok())
    }

    fn s3_settings_with(&self, env: impl Fn(&str) -> Option<String>) -> S3Settings {
        S3Settings {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
            access_key_id: self
                .access_key_id
                .clone()
                .or_else(|| env("AWS_ACCESS_KEY_ID")),
            secret_access_key: self
                .secret_access_key
                .clone()
                .or_else(|| env("AWS_SECRET_ACCESS_KEY")),
            session_token: self
                .session_token
                .clone()
                .or_else(|| env("AWS_SESSION_TOKEN")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevalidationConfig {
    pub cooldown_secs: u64,
    pub probe_timeout_ms: u64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        let origin = OriginConfig::default();
        Self {
            cooldown_secs: store.cooldown_secs,
            probe_timeout_ms: origin.probe_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub min_size_bytes: u64,
    pub scratch_dir: Option<PathBuf>,
    pub download_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            min_size_bytes: FetchConfig::default().min_size_bytes,
            scratch_dir: None,
            download_timeout_secs: OriginConfig::default().download_timeout_secs,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub log_format: LogFormat,
    pub storage: StorageConfig,
    pub revalidation: RevalidationConfig,
    pub fetch: FetchSection,
    pub rules: ClassifierRules,
    /// Re-list the bucket this often. Disabled when unset or zero.
    pub rebuild_interval_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::default(),
            storage: StorageConfig::default(),
            revalidation: RevalidationConfig::default(),
            fetch: FetchSection::default(),
            rules: ClassifierRules::default(),
            rebuild_interval_secs: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            cooldown_secs: self.revalidation.cooldown_secs,
            public_base_url: self.storage.public_base_url(),
        }
    }

    pub fn origin_config(&self) -> OriginConfig {
        OriginConfig {
            probe_timeout_ms: self.revalidation.probe_timeout_ms,
            download_timeout_secs: self.fetch.download_timeout_secs,
            ..Default::default()
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            min_size_bytes: self.fetch.min_size_bytes,
            scratch_dir: self.fetch.scratch_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ProxyConfig::from_yaml("").unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.revalidation.cooldown_secs, 60);
        assert_eq!(config.revalidation.probe_timeout_ms, 1500);
        assert_eq!(config.fetch.min_size_bytes, 1024);
        assert_eq!(config.rules, ClassifierRules::default());
        assert!(config.rebuild_interval_secs.is_none());
    }

    #[test]
    fn test_partial_config() {
        let yaml = r#"
listen_addr: "127.0.0.1:9000"
log_format: json
storage:
  backend: filesystem
  root_dir: /var/lib/depcache
  public_base_url: "http://files.internal/depcache/"
revalidation:
  cooldown_secs: 300
fetch:
  min_size_bytes: 4096
rules:
  whitelist:
    - pattern: "files.internal/dist"
    - pattern: "mirror.internal"
      prefix_only: true
rebuild_interval_secs: 3600
"#;
        let config = ProxyConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.root_dir, PathBuf::from("/var/lib/depcache"));
        assert_eq!(config.revalidation.probe_timeout_ms, 1500);
        assert_eq!(config.store_config().cooldown_secs, 300);
        assert_eq!(
            config.store_config().public_base_url,
            "http://files.internal/depcache/"
        );
        assert_eq!(config.fetch_config().min_size_bytes, 4096);
        assert_eq!(config.rules.whitelist.len(), 2);
        assert!(config.rules.whitelist[1].prefix_only);
        // Unlisted tables keep their built-in contents.
        assert_eq!(config.rules.blacklist, vec!["favicon.ico".to_string()]);
        assert_eq!(config.rebuild_interval_secs, Some(3600));
    }

    #[test]
    fn test_public_base_url_derivation() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.public_base_url(), "https://depcache.s3.amazonaws.com/");
        storage.endpoint = Some("http://minio:9000/".to_string());
        assert_eq!(storage.public_base_url(), "http://minio:9000/depcache/");
    }

    #[test]
    fn test_credentials_fall_back_to_env() {
        let storage = StorageConfig {
            access_key_id: Some("from-config".to_string()),
            ..Default::default()
        };
        let settings = storage.s3_settings_with(|name| match name {
            "AWS_ACCESS_KEY_ID" => Some("from-env".to_string()),
            "AWS_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(settings.access_key_id.as_deref(), Some("from-config"));
        assert_eq!(settings.secret_access_key.as_deref(), Some("secret"));
        assert!(settings.session_token.is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depcache.yaml");
        std::fs::write(&path, "storage:\n  backend: memory\n").unwrap();
        let config = ProxyConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);

        assert!(ProxyConfig::from_file(&dir.path().join("missing.yaml")).is_err());
    }
}
