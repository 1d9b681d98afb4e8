//! depcache server entrypoint.

use anyhow::Context;
use clap::Parser;
use depcache_api::{AppState, create_router};
use depcache_cache::{
    CacheMetrics, CacheStore, FetchConfig, Fetcher, FilesystemObjectStore, HttpOrigin,
    MemoryObjectStore, RequestHandler, S3ObjectStore, UrlClassifier,
};
use depcache_core::{ObjectStore, Origin};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

mod config;
mod telemetry;

use config::{LogFormat, ProxyConfig, StorageBackend, StorageConfig};

#[derive(Parser)]
#[command(name = "depcache")]
#[command(author, version, about = "Caching redirect proxy for build dependency downloads", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "DEPCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    telemetry::init_tracing(config.log_format);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting depcache");

    let classifier = UrlClassifier::new(&config.rules).context("Invalid URL rules")?;
    info!(rules = classifier.rule_count(), "Loaded URL rules");

    let objects = object_store(&config.storage, &config.fetch_config()).await?;
    let store = Arc::new(CacheStore::new(objects, &config.store_config())?);
    match store.rebuild().await {
        Ok(report) => info!(
            entries = report.loaded(),
            skipped = report.skipped(),
            "Loaded cache"
        ),
        Err(e) => error!(error = %e, "Initial cache rebuild failed, starting empty"),
    }

    let origin: Arc<dyn Origin> = Arc::new(HttpOrigin::new(&config.origin_config())?);
    let metrics = CacheMetrics::new();
    let fetcher = Arc::new(Fetcher::new(
        store.clone(),
        origin.clone(),
        config.fetch_config(),
        metrics.clone(),
    ));
    let handler = Arc::new(RequestHandler::new(
        classifier,
        store.clone(),
        fetcher,
        origin,
        metrics,
    ));

    if let Some(secs) = config.rebuild_interval_secs.filter(|s| *s > 0) {
        spawn_periodic_rebuild(store, Duration::from_secs(secs));
    }

    let app = create_router(Arc::new(AppState::new(handler)));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn object_store(
    storage: &StorageConfig,
    fetch: &FetchConfig,
) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match storage.backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::new(&storage.s3_settings())),
        StorageBackend::Filesystem => {
            info!(root = %storage.root_dir.display(), "Using filesystem object store");
            Arc::new(FilesystemObjectStore::new(storage.root_dir.clone()))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory object store; the cache is lost on restart");
            Arc::new(MemoryObjectStore::new())
        }
    };
    if let Some(dir) = &fetch.scratch_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create scratch dir {}", dir.display()))?;
    }
    Ok(store)
}

fn spawn_periodic_rebuild(store: Arc<CacheStore>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Periodic cache rebuild enabled");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already rebuilt.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = store.rebuild().await {
                warn!(error = %e, "Periodic cache rebuild failed, keeping current entries");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
