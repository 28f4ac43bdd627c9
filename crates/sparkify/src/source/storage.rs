//! Record source backed by a [`StorageProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use snafu::prelude::*;
use tracing::{debug, info};

use sparkify_core::{ObjectEntry, StorageError, StorageProvider, StorageProviderRef};

use super::{NdjsonReader, PathPattern, RecordSource, Shard};
use crate::error::{FetchSnafu, NoMatchingFilesSnafu, SourceError, UnavailableSnafu};

/// Lists and decodes NDJSON files under one storage root.
#[derive(Debug, Clone)]
pub struct StorageRecordSource {
    storage: StorageProviderRef,
    max_concurrent_files: usize,
    skip_malformed: bool,
}

impl StorageRecordSource {
    /// Connect to `root` using backend `storage_options`.
    pub async fn new(
        root: &str,
        storage_options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let storage = StorageProvider::for_url_with_options(root, storage_options).await?;
        Ok(Self::from_storage(Arc::new(storage)))
    }

    pub fn from_storage(storage: StorageProviderRef) -> Self {
        Self {
            storage,
            max_concurrent_files: 16,
            skip_malformed: false,
        }
    }

    /// Maximum number of files fetched at once. Output order is unaffected.
    pub fn with_max_concurrent_files(mut self, max: usize) -> Self {
        self.max_concurrent_files = max.max(1);
        self
    }

    /// Skip malformed lines instead of failing the read.
    pub fn with_skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }

    /// Objects matching `pattern`, in path order.
    pub async fn list_matching(&self, pattern: &PathPattern) -> Result<Vec<ObjectEntry>, SourceError> {
        let entries = self
            .storage
            .list_with_prefix(pattern.prefix())
            .await
            .context(UnavailableSnafu {
                pattern: pattern.as_str(),
            })?;

        let matched: Vec<ObjectEntry> = entries
            .into_iter()
            .filter(|entry| pattern.matches(entry.path.as_ref()))
            .collect();

        ensure!(
            !matched.is_empty(),
            NoMatchingFilesSnafu {
                pattern: pattern.as_str(),
                root: self.storage.canonical_url(),
            }
        );

        let bytes: u64 = matched.iter().map(|e| e.size).sum();
        info!(
            pattern = pattern.as_str(),
            files = matched.len(),
            bytes,
            "Listed source files"
        );
        Ok(matched)
    }

    async fn read_shard<T: DeserializeOwned>(
        &self,
        entry: ObjectEntry,
        reader: NdjsonReader,
    ) -> Result<Shard<T>, SourceError> {
        let path = entry.path.to_string();
        let data = self
            .storage
            .get(&entry.path)
            .await
            .context(FetchSnafu { path: path.as_str() })?;

        let (lines, records): (Vec<usize>, Vec<T>) =
            reader.read_numbered(&data, &path)?.into_iter().unzip();
        debug!(path = %path, records = records.len(), "Read shard");
        Ok(Shard::with_lines(path, records, lines))
    }
}

#[async_trait]
impl RecordSource for StorageRecordSource {
    fn stream<T>(&self, pattern: &str) -> BoxStream<'_, Result<Shard<T>, SourceError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let pattern = pattern.to_string();
        let listing = async move {
            let pattern = PathPattern::new(&pattern)?;
            let entries = self.list_matching(&pattern).await?;
            let reader = NdjsonReader::new(pattern.dataset(), self.skip_malformed);
            Ok::<_, SourceError>((entries, reader))
        };

        stream::once(listing)
            .map_ok(move |(entries, reader)| {
                stream::iter(entries)
                    .map(move |entry| self.read_shard::<T>(entry, reader.clone()))
                    .buffered(self.max_concurrent_files)
            })
            .try_flatten()
            .boxed()
    }
}
