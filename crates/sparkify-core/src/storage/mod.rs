//! Multi-cloud storage abstraction.
//!
//! A `StorageProvider` is rooted at a URL (bucket plus optional key prefix, or
//! a local directory). Every path passed in or handed back is relative to
//! that root.

mod azure;
mod gcs;
mod local;
mod s3;
mod url_parser;

pub use azure::AzureConfig;
pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ObjectStoreSnafu, StorageError};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// One listed object, relative to the provider root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub path: Path,
    pub size: u64,
}

/// Storage provider that abstracts over different cloud storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    ///
    /// `options` are backend configuration keys (`aws_access_key_id`,
    /// `google_service_account_key`, `azure_storage_account_key`, ...). They are
    /// the only credential channel; the process environment is not consulted.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, &options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, &options),
            BackendConfig::Azure(config) => Self::construct_azure(config, &options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Canonical URL of the provider root, for logs.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object below `prefix` (recursively), sorted by path.
    ///
    /// An empty prefix lists the whole root. A prefix that does not exist
    /// yields an empty list.
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let prefix = Path::from(prefix);
        let full_prefix = self.qualify_path(&prefix);
        let root_parts = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let listing = if full_prefix.as_ref().is_empty() {
            self.object_store.list(None)
        } else {
            self.object_store.list(Some(&full_prefix))
        };

        let mut entries: Vec<ObjectEntry> = listing
            .map_ok(|meta| ObjectEntry {
                path: meta.location.parts().skip(root_parts).collect(),
                size: meta.size as u64,
            })
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;

        entries.sort_by(|a, b| a.path.as_ref().cmp(b.path.as_ref()));
        debug!(
            root = %self.canonical_url,
            prefix = %prefix,
            objects = entries.len(),
            "Listed objects"
        );
        Ok(entries)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let path = self.qualify_path(path);
        let result = self.object_store.get(&path).await.context(ObjectStoreSnafu)?;
        result.bytes().await.context(ObjectStoreSnafu)
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        self.put_payload_with_opts(path, payload, PutOptions::default())
            .await
    }

    /// Put a Parquet file with `Content-Type: application/vnd.apache.parquet`.
    ///
    /// Local filesystem doesn't support attributes, so they are skipped there.
    pub async fn put_parquet(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        if matches!(self.config, BackendConfig::Local(_)) {
            return self.put_payload(path, payload).await;
        }

        let opts = PutOptions {
            attributes: Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from("application/vnd.apache.parquet"),
            )]),
            ..Default::default()
        };
        self.put_payload_with_opts(path, payload, opts).await
    }

    async fn put_payload_with_opts(
        &self,
        path: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        self.object_store
            .put_opts(&path, payload, opts)
            .await
            .context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete a file at the given path. Missing files are not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        match self.object_store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }
}
