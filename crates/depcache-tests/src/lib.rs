//! End-to-end test infrastructure for depcache.
//!
//! Tests run the real router and [`depcache_cache::HttpOrigin`] against a
//! `wiremock` origin on localhost.
//!
//! # Usage
//!
//! ```ignore
//! use depcache_tests::{OriginFixture, ProxyOptions, ProxyTestClient, start_test_proxy};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let origin = OriginFixture::start().await;
//!     let proxy = start_test_proxy(ProxyOptions::default()).await.unwrap();
//!     let client = ProxyTestClient::new(proxy.addr);
//!     let resp = client.proxy(&origin.url("/files/a.tar.gz")).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,depcache_cache=debug")),
        )
        .with_test_writer()
        .try_init();
}
