//! Local filesystem backend

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use snapvault_common::{
    object_key, prefix_root, validate_key, Backend, ByteStream, Result, StoreError,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Directory under the root holding in-flight writes.
const STAGING_DIR: &str = ".staging";

/// Read granularity for streamed gets.
const CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem backend laid out as `<root>/v1/<prefix>/<key>`
pub struct LocalBackend {
    root: PathBuf,
    prefix: String,
}

impl LocalBackend {
    pub async fn new(root: PathBuf, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_key(&prefix)?;

        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        fs::create_dir_all(root.join(prefix_root(&prefix))).await?;

        Ok(Self { root, prefix })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(object_key(&self.prefix, key))
    }

    /// Files under `v1/<prefix>/` as (relative key, size) pairs.
    async fn walk(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        let mut found = Vec::new();
        let mut pending = vec![(self.root.join(prefix_root(prefix)), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        debug!("Skipping non-UTF-8 entry {:?} in {}", raw, dir.display());
                        continue;
                    }
                };
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() {
                    found.push((key, entry.metadata().await?.len()));
                }
            }
        }

        Ok(found)
    }
}

fn map_io(key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        validate_key(key)?;
        let path = self.object_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically
        let temp_path = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Stored {} ({} bytes) to local", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        validate_key(key)?;
        let file = fs::File::open(self.object_path(key))
            .await
            .map_err(|e| map_io(key, e))?;

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = file.read(&mut buf).await.map_err(StoreError::from)?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok::<_, StoreError>(Some((Bytes::from(buf), file)))
        });

        Ok(stream.boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        fs::remove_file(self.object_path(key))
            .await
            .map_err(|e| map_io(key, e))?;

        debug!("Deleted {} from local", key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .walk(&self.prefix)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn total_size(&self) -> Result<u64> {
        Ok(self
            .walk(&self.prefix)
            .await?
            .into_iter()
            .map(|(_, size)| size)
            .sum())
    }

    async fn copy_prefix(&self, from: &str) -> Result<()> {
        validate_key(from)?;

        for (key, _) in self.walk(from).await? {
            let source = self.root.join(object_key(from, &key));
            let data = fs::read(&source).await.map_err(|e| map_io(&key, e))?;
            self.put(&key, Bytes::from(data)).await?;
        }

        debug!("Copied prefix {} into {}", from, self.prefix);
        Ok(())
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}
