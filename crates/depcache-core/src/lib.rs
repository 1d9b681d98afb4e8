//! depcache core
//!
//! Shared error type, object-store and origin data types, and the port
//! traits the cache engine talks to. Adapters (S3, filesystem, reqwest)
//! live in `depcache-cache`; this crate stays free of I/O dependencies.

pub mod error;
pub mod object;
pub mod origin;
pub mod ports;

pub use error::{Error, Result};
pub use object::{ObjectMetadata, StoredObject};
pub use origin::{OriginDownload, ProbeResponse, is_html};
pub use ports::{ObjectStore, Origin};
