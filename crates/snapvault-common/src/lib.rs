// Shared blob-store contract used by every snapvault backend and by the retention engine.

use async_trait::async_trait;
pub use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;

/// Leading key segment identifying the on-store layout revision.
pub const SCHEMA_SEGMENT: &str = "v1";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object Not Found: {0}")]
    NotFound(String),

    #[error("Invalid Key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend Error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Readable object body. Chunks arrive in order; the stream ends at EOF.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Capability set a blob store must provide.
///
/// Every backend is bound to one caller prefix at construction time and
/// addresses objects as `v1/<prefix>/<key>`. Keys passed in and returned
/// from [`Backend::list`] are relative to that prefix.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Open the object under `key` for reading.
    async fn get(&self, key: &str) -> Result<ByteStream>;

    /// Remove the object under `key`. Fails with [`StoreError::NotFound`] if absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every key under this backend's prefix, prefix stripped, in no particular order.
    async fn list(&self) -> Result<Vec<String>>;

    /// Sum of content lengths under this backend's prefix.
    async fn total_size(&self) -> Result<u64>;

    /// Copy every object under `v1/<from>/` into this backend's prefix,
    /// preserving relative keys.
    async fn copy_prefix(&self, from: &str) -> Result<()>;

    /// Caller prefix this backend was configured with.
    fn prefix(&self) -> &str;
}

/// Reject keys that could escape the prefix or map ambiguously onto a path.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    };

    if key.is_empty() {
        return invalid("empty");
    }
    if key.starts_with('/') {
        return invalid("absolute");
    }
    if key.contains('\\') {
        return invalid("backslash");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Full store path of the directory holding objects for `prefix`.
pub fn prefix_root(prefix: &str) -> String {
    format!("{SCHEMA_SEGMENT}/{prefix}")
}

/// Full store path of `key` under `prefix`.
pub fn object_key(prefix: &str, key: &str) -> String {
    format!("{SCHEMA_SEGMENT}/{prefix}/{key}")
}

/// Drain a chunk stream into one contiguous buffer.
pub async fn collect_stream<S, T, E>(stream: S) -> std::result::Result<Bytes, E>
where
    S: futures::Stream<Item = std::result::Result<T, E>>,
    T: AsRef<[u8]>,
{
    let mut data = Vec::new();
    let mut stream = Box::pin(stream);
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(chunk?.as_ref());
    }
    Ok(Bytes::from(data))
}
