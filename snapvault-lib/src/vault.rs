//! Retention engine over a [`Backend`].

use crate::name::{encode_name, parse_name, SnapshotName};
use crate::{Result, VaultError};
use bytes::Bytes;
use futures::{stream, Stream};
use serde::Serialize;
use snapvault_common::{collect_stream, Backend, ByteStream, StoreError};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful [`SnapshotVault::purge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Retained snapshots, most recent first
    pub kept: Vec<SnapshotName>,
    /// Snapshots removed by this call or found already gone
    pub deleted: Vec<SnapshotName>,
}

/// Saves, finds and prunes snapshots for one backup stream.
///
/// Holds no state besides the backend handle, so it can be cloned and shared
/// freely between tasks. Concurrent saves with distinct revisions never
/// collide; a save racing a purge may or may not survive it.
#[derive(Clone)]
pub struct SnapshotVault {
    backend: Arc<dyn Backend>,
}

impl SnapshotVault {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Store the snapshot read from `data` and return its name.
    #[instrument(skip(self, data), fields(prefix = %self.backend.prefix()))]
    pub async fn save<S, T, E>(&self, version: &str, revision: i64, data: S) -> Result<SnapshotName>
    where
        S: Stream<Item = std::result::Result<T, E>> + Send,
        T: AsRef<[u8]> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    {
        let name = encode_name(version, revision)?;
        let body = collect_stream(data)
            .await
            .map_err(|e| VaultError::Read(e.into()))?;
        let size = body.len();

        self.backend
            .put(name.as_str(), body)
            .await
            .map_err(|source| VaultError::store("put", name.as_str(), source))?;

        info!(name = %name, size, "Saved snapshot");
        Ok(name)
    }

    pub async fn save_bytes(&self, version: &str, revision: i64, data: Bytes) -> Result<SnapshotName> {
        self.save(version, revision, stream::iter([Ok::<_, StoreError>(data)]))
            .await
    }

    /// Most recent snapshot currently in the store.
    pub async fn get_latest(&self) -> Result<SnapshotName> {
        self.scan()
            .await?
            .into_iter()
            .max()
            .ok_or_else(|| {
                VaultError::NotFound(format!(
                    "no snapshots under prefix {:?}",
                    self.backend.prefix()
                ))
            })
    }

    /// Every parseable snapshot, most recent first.
    pub async fn catalog(&self) -> Result<Vec<SnapshotName>> {
        let mut names = self.scan().await?;
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    pub async fn open(&self, name: impl AsRef<str>) -> Result<ByteStream> {
        let name = name.as_ref();
        self.backend.get(name).await.map_err(|source| match source {
            StoreError::NotFound(_) => VaultError::NotFound(name.to_string()),
            source => VaultError::store("get", name, source),
        })
    }

    /// Read a whole snapshot into memory.
    pub async fn read(&self, name: impl AsRef<str>) -> Result<Bytes> {
        let name = name.as_ref();
        let body = self.open(name).await?;
        collect_stream(body)
            .await
            .map_err(|source| VaultError::store("get", name, source))
    }

    pub async fn delete(&self, name: impl AsRef<str>) -> Result<()> {
        let name = name.as_ref();
        self.backend.delete(name).await.map_err(|source| match source {
            StoreError::NotFound(_) => VaultError::NotFound(name.to_string()),
            source => VaultError::store("delete", name, source),
        })?;

        info!(name, "Deleted snapshot");
        Ok(())
    }

    /// Keep the `keep_count` most recent snapshots and delete the rest.
    ///
    /// Keys that do not parse as snapshot names are left alone. Every
    /// deletion is attempted even if earlier ones fail; failures come back
    /// together as [`VaultError::Aggregate`].
    #[instrument(skip(self), fields(prefix = %self.backend.prefix()))]
    pub async fn purge(&self, keep_count: usize) -> Result<PurgeReport> {
        let mut kept = self.catalog().await?;
        let doomed = kept.split_off(keep_count.min(kept.len()));

        let mut deleted = Vec::with_capacity(doomed.len());
        let mut failures = Vec::new();
        for name in doomed {
            match self.backend.delete(name.as_str()).await {
                Ok(()) => deleted.push(name),
                Err(StoreError::NotFound(_)) => {
                    debug!(name = %name, "Snapshot already removed");
                    deleted.push(name);
                }
                Err(source) => {
                    warn!(name = %name, error = %source, "Failed to delete snapshot");
                    failures.push(VaultError::store("delete", name.as_str(), source));
                }
            }
        }

        if !failures.is_empty() {
            return Err(VaultError::Aggregate(failures));
        }

        info!(kept = kept.len(), deleted = deleted.len(), "Purged snapshots");
        Ok(PurgeReport { kept, deleted })
    }

    pub async fn total_size(&self) -> Result<u64> {
        self.backend
            .total_size()
            .await
            .map_err(|source| VaultError::store("total_size", self.backend.prefix(), source))
    }

    /// Copy every object from a staged prefix into this vault's prefix.
    pub async fn promote(&self, from_prefix: &str) -> Result<()> {
        self.backend
            .copy_prefix(from_prefix)
            .await
            .map_err(|source| VaultError::store("copy_prefix", from_prefix, source))?;

        info!(from = from_prefix, to = self.backend.prefix(), "Promoted snapshots");
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<SnapshotName>> {
        let keys = self
            .backend
            .list()
            .await
            .map_err(|source| VaultError::store("list", self.backend.prefix(), source))?;

        Ok(keys
            .into_iter()
            .filter_map(|key| match parse_name(&key) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping foreign key in snapshot catalog");
                    None
                }
            })
            .collect())
    }
}
