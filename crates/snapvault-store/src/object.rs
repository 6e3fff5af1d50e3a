//! S3-compatible / Azure Blob backend built on `object_store`

use crate::config::{AzureConfig, S3Config};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use snapvault_common::{
    object_key, prefix_root, validate_key, Backend, ByteStream, Result, StoreError,
};
use std::sync::Arc;
use tracing::debug;

/// Remote object store backend (AWS S3, MinIO, R2, Azure Blob, Azurite, etc.)
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectBackend {
    /// Wrap an already-built store, e.g. one sharing a client with the caller.
    pub fn with_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_key(&prefix)?;
        Ok(Self { store, prefix })
    }

    /// Create with explicit S3 configuration
    pub fn from_s3(config: &S3Config) -> Result<Self> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        let store = builder
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to create S3 backend: {e}")))?;

        Self::with_store(Arc::new(store), config.prefix.clone())
    }

    /// Create with explicit Azure Blob Storage configuration
    pub fn from_azure(config: &AzureConfig) -> Result<Self> {
        use object_store::azure::MicrosoftAzureBuilder;

        let store = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_access_key(&config.access_key)
            .with_container_name(&config.container)
            .with_use_emulator(config.use_emulator)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to create Azure backend: {e}")))?;

        Self::with_store(Arc::new(store), config.prefix.clone())
    }

    /// Store path of `key`, kept verbatim so listed keys map back to the same object.
    fn location(&self, key: &str) -> Result<ObjectPath> {
        validate_key(key)?;
        ObjectPath::parse(object_key(&self.prefix, key)).map_err(|e| StoreError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Objects under `v1/<prefix>/`, keyed relative to that root.
    async fn list_under(&self, prefix: &str) -> Result<Vec<(String, ObjectMeta)>> {
        let root = prefix_root(prefix);
        let root_path = ObjectPath::parse(&root).map_err(|e| StoreError::InvalidKey {
            key: prefix.to_string(),
            reason: e.to_string(),
        })?;
        let strip = format!("{root}/");

        let mut listing = self.store.list(Some(&root_path));
        let mut found = Vec::new();
        while let Some(meta) = listing
            .try_next()
            .await
            .map_err(|e| store_error(prefix, e))?
        {
            let key = match meta.location.to_string().strip_prefix(&strip) {
                Some(key) => key.to_string(),
                None => continue,
            };
            found.push((key, meta));
        }

        Ok(found)
    }
}

fn store_error(key: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound(key.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Backend for ObjectBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let location = self.location(key)?;
        let size = data.len();

        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| store_error(key, e))?;

        debug!("Stored {} ({} bytes) to object store at {}", key, size, location);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let result = self
            .store
            .get(&self.location(key)?)
            .await
            .map_err(|e| store_error(key, e))?;

        let key = key.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| store_error(&key, e))
            .boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let location = self.location(key)?;

        // S3 reports success for absent keys, so existence is checked first
        self.store
            .head(&location)
            .await
            .map_err(|e| store_error(key, e))?;
        self.store
            .delete(&location)
            .await
            .map_err(|e| store_error(key, e))?;

        debug!("Deleted {} from object store", key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .list_under(&self.prefix)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn total_size(&self) -> Result<u64> {
        Ok(self
            .list_under(&self.prefix)
            .await?
            .into_iter()
            .map(|(_, meta)| meta.size as u64)
            .sum())
    }

    async fn copy_prefix(&self, from: &str) -> Result<()> {
        validate_key(from)?;

        for (key, meta) in self.list_under(from).await? {
            let target = self.location(&key)?;
            self.store
                .copy(&meta.location, &target)
                .await
                .map_err(|e| store_error(&key, e))?;
        }

        debug!("Copied prefix {} into {}", from, self.prefix);
        Ok(())
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}
