//! Versioned snapshot naming and retention on top of a blob store.
//!
//! [`SnapshotVault`] saves snapshots under names that encode a datastore
//! version and a monotonically increasing revision, finds the latest one, and
//! purges all but the most recent N. The catalog is re-listed from the store
//! on every call; nothing is cached.

use snapvault_common::StoreError;
use thiserror::Error;

pub mod name;
pub mod vault;

pub use name::{encode_name, parse_name, SnapshotName, Version, REVISION_WIDTH, SNAPSHOT_SUFFIX};
pub use vault::{PurgeReport, SnapshotVault};

// Re-export the store layer so callers can build backends from one crate
pub use snapvault_common as common;
pub use snapvault_store as store;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Snapshot Not Found: {0}")]
    NotFound(String),

    #[error("Malformed snapshot name {name:?}: {reason}")]
    MalformedName { name: String, reason: String },

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("Reading snapshot data failed: {0}")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Store {op} failed for {key:?}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("{} snapshot operation(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<VaultError>),
}

impl VaultError {
    pub(crate) fn store(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        VaultError::Store {
            op,
            key: key.into(),
            source,
        }
    }
}

fn join_errors(errors: &[VaultError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, VaultError>;
