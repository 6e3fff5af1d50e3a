//! Backend selection and credentials.
//!
//! Credentials are always supplied by the caller; nothing here reads the
//! process environment.

use crate::{InMemoryBackend, LocalBackend};
use serde::{Deserialize, Serialize};
use snapvault_common::{Backend, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "object-storage")]
use crate::ObjectBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Local { root: PathBuf, prefix: String },
    Memory { prefix: String },
    S3(S3Config),
    Azure(AzureConfig),
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Local { .. } => "local",
            StoreConfig::Memory { .. } => "memory",
            StoreConfig::S3(_) => "s3",
            StoreConfig::Azure(_) => "azure",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Custom endpoint for MinIO, R2 and friends
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub account: String,
    pub access_key: String,
    pub container: String,
    pub prefix: String,
    /// Target a local Azurite emulator instead of the public endpoint
    #[serde(default)]
    pub use_emulator: bool,
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("access_key", &"<redacted>")
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

/// Build the backend described by `config`.
pub async fn open_backend(config: &StoreConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config {
        StoreConfig::Local { root, prefix } => {
            Arc::new(LocalBackend::new(root.clone(), prefix.clone()).await?)
        }
        StoreConfig::Memory { prefix } => Arc::new(InMemoryBackend::new(prefix.clone())?),
        #[cfg(feature = "object-storage")]
        StoreConfig::S3(s3) => Arc::new(ObjectBackend::from_s3(s3)?),
        #[cfg(feature = "object-storage")]
        StoreConfig::Azure(azure) => Arc::new(ObjectBackend::from_azure(azure)?),
        #[cfg(not(feature = "object-storage"))]
        StoreConfig::S3(_) | StoreConfig::Azure(_) => {
            return Err(snapvault_common::StoreError::Config(
                "Object storage feature not enabled. Enable with --features object-storage"
                    .to_string(),
            ))
        }
    };

    info!(kind = config.kind(), prefix = backend.prefix(), "Opened snapshot store");
    Ok(backend)
}
