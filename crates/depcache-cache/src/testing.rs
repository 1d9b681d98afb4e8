//! In-process origin double for unit tests.

use async_trait::async_trait;
use depcache_core::{Error, Origin, OriginDownload, ProbeResponse, Result};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone)]
struct CannedDownload {
    status: u16,
    content_type: Option<String>,
    etag: Option<String>,
    body: Vec<u8>,
}

/// Origin serving canned probe and download responses.
pub(crate) struct StaticOrigin {
    probe: Mutex<std::result::Result<ProbeResponse, String>>,
    download: Mutex<CannedDownload>,
    probes: AtomicUsize,
    downloads: AtomicUsize,
}

impl StaticOrigin {
    pub(crate) fn new() -> Self {
        Self {
            probe: Mutex::new(Err("no probe configured".to_string())),
            download: Mutex::new(CannedDownload {
                status: 200,
                content_type: Some("application/octet-stream".to_string()),
                etag: None,
                body: vec![7u8; 4096],
            }),
            probes: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_probe(&self, probe: ProbeResponse) {
        *self.probe.lock().unwrap() = Ok(probe);
    }

    pub(crate) fn fail_probe(&self, message: &str) {
        *self.probe.lock().unwrap() = Err(message.to_string());
    }

    pub(crate) fn set_download(
        &self,
        status: u16,
        content_type: &str,
        etag: Option<&str>,
        body: Vec<u8>,
    ) {
        *self.download.lock().unwrap() = CannedDownload {
            status,
            content_type: Some(content_type.to_string()),
            etag: etag.map(str::to_string),
            body,
        };
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for StaticOrigin {
    async fn probe(&self, _url: &str) -> Result<ProbeResponse> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.probe.lock().unwrap().clone().map_err(Error::Origin)
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<OriginDownload> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let canned = self.download.lock().unwrap().clone();
        tokio::fs::write(dest, &canned.body).await?;
        Ok(OriginDownload {
            status: canned.status,
            etag: canned.etag,
            content_type: canned.content_type,
            size: canned.body.len() as u64,
        })
    }
}
