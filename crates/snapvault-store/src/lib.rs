//! Blob store backends for snapshot persistence
//!
//! Each backend implements [`snapvault_common::Backend`] and is interchangeable
//! behind an `Arc<dyn Backend>`:
//! - [`LocalBackend`]: directory tree on local disk
//! - [`InMemoryBackend`]: process-local map for tests and development
//! - [`ObjectBackend`]: S3-compatible or Azure Blob object stores
//!
//! All of them lay objects out as `v1/<prefix>/<key>`.

mod config;
mod local;
mod memory;
#[cfg(feature = "object-storage")]
mod object;

pub use config::{open_backend, AzureConfig, S3Config, StoreConfig};
pub use local::LocalBackend;
pub use memory::InMemoryBackend;
#[cfg(feature = "object-storage")]
pub use object::ObjectBackend;

pub use snapvault_common as common;
pub use snapvault_common::{Backend, ByteStream, StoreError};

#[cfg(feature = "object-storage")]
pub use object_store;
