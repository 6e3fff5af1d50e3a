use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use snapvault_common::{
    object_key, prefix_root, validate_key, Backend, ByteStream, Result, StoreError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// In-memory backend for development/testing
#[derive(Clone)]
pub struct InMemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
    prefix: String,
}

impl InMemoryBackend {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_key(&prefix)?;
        Ok(Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            prefix,
        })
    }

    /// Another view over the same objects, bound to a different prefix.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_key(&prefix)?;
        Ok(Self {
            objects: self.objects.clone(),
            prefix,
        })
    }

    async fn entries_under(&self, prefix: &str) -> Vec<(String, Bytes)> {
        let root = format!("{}/", prefix_root(prefix));
        self.objects
            .read()
            .await
            .range(root.clone()..)
            .take_while(|(k, _)| k.starts_with(&root))
            .map(|(k, v)| (k[root.len()..].to_string(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert(object_key(&self.prefix, key), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        validate_key(key)?;
        let data = self
            .objects
            .read()
            .await
            .get(&object_key(&self.prefix, key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        Ok(futures::stream::once(async move { Ok::<_, StoreError>(data) }).boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .remove(&object_key(&self.prefix, key))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries_under(&self.prefix)
            .await
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn total_size(&self) -> Result<u64> {
        Ok(self
            .entries_under(&self.prefix)
            .await
            .iter()
            .map(|(_, data)| data.len() as u64)
            .sum())
    }

    async fn copy_prefix(&self, from: &str) -> Result<()> {
        validate_key(from)?;
        let staged = self.entries_under(from).await;

        let mut objects = self.objects.write().await;
        for (key, data) in staged {
            objects.insert(object_key(&self.prefix, &key), data);
        }
        Ok(())
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}
