//! Partitioned table sinks.
//!
//! A sink receives a whole table as one Arrow batch and replaces whatever the
//! destination held before. [`ParquetSink`] writes Hive-partitioned Parquet
//! files through a [`StorageProvider`].

mod split;
mod writer;

pub use split::{PartitionGroup, split_by_partition};
pub use writer::{FinishedFile, ParquetWriter, ParquetWriterConfig};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use deltalake::arrow::array::RecordBatch;
use futures::{StreamExt, stream};
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{EncodeTaskSnafu, SinkError, WriteFailureSnafu};
use sparkify_core::emit;
use sparkify_core::metrics::events::{
    ParquetFileWritten, RowsWritten, StaleFilesRemoved, TableWriteCompleted,
};
use sparkify_core::{StorageError, StorageProvider, StorageProviderRef};

/// Marker written after a table has been fully replaced.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

const MAX_CONCURRENT_REQUESTS: usize = 8;

/// How a write treats existing data at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace every object under the table directory.
    #[default]
    Overwrite,
}

/// Outcome of one table write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: usize,
    pub files: usize,
    pub bytes: usize,
    /// Objects from a previous run that were removed.
    pub stale_removed: usize,
}

/// Writes a table, optionally partitioned, to a destination.
#[async_trait]
pub trait PartitionedSink: Send + Sync {
    async fn write(
        &self,
        table: &'static str,
        batch: RecordBatch,
        partition_columns: &[&str],
        mode: WriteMode,
    ) -> Result<WriteSummary, SinkError>;
}

/// Parquet files on object storage.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    storage: StorageProviderRef,
    config: ParquetWriterConfig,
}

impl ParquetSink {
    pub async fn new(
        root: &str,
        storage_options: HashMap<String, String>,
        config: ParquetWriterConfig,
    ) -> Result<Self, StorageError> {
        let storage = StorageProvider::for_url_with_options(root, storage_options).await?;
        Ok(Self::from_storage(Arc::new(storage), config))
    }

    pub fn from_storage(storage: StorageProviderRef, config: ParquetWriterConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }

    /// Encode on the blocking pool; Parquet encoding is CPU bound.
    async fn encode(
        &self,
        table: &'static str,
        batch: RecordBatch,
        partition_columns: &[&str],
    ) -> Result<Vec<FinishedFile>, SinkError> {
        let columns: Vec<String> = partition_columns.iter().map(|c| c.to_string()).collect();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let groups = split_by_partition(table, &batch, &columns)?;
            let Some(first) = groups.first() else {
                return Ok(Vec::new());
            };

            let mut writer = ParquetWriter::new(table, first.batch.schema(), config);
            for group in groups {
                writer.set_partition_dir(group.dir)?;
                writer.write_batch(&group.batch)?;
            }
            writer.close()
        })
        .await
        .context(EncodeTaskSnafu { table })?
    }

    /// Upload every file. On any failure, remove the ones that made it.
    async fn upload_all(&self, table: &'static str, files: &[FinishedFile]) -> Result<(), SinkError> {
        let results: Vec<(&Path, Result<(), StorageError>)> = stream::iter(files)
            .map(|file| async move {
                let payload = PutPayload::from(file.bytes.clone());
                (&file.path, self.storage.put_parquet(&file.path, payload).await)
            })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut uploaded = Vec::new();
        let mut failure = None;
        for (path, result) in results {
            match result {
                Ok(()) => uploaded.push(path),
                Err(e) => {
                    warn!(table, path = %path, error = %e, "Upload failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        let Some(source) = failure else {
            return Ok(());
        };

        for path in uploaded {
            if let Err(e) = self.storage.delete(path).await {
                warn!(table, path = %path, error = %e, "Failed to remove partial upload");
            }
        }
        Err(source).context(WriteFailureSnafu { table })
    }

    /// Delete every stale object. All deletes run to completion; the first
    /// failure is returned after the rest have been attempted and logged.
    async fn remove_stale(&self, table: &'static str, stale: Vec<Path>) -> Result<usize, SinkError> {
        let results: Vec<(Path, Result<(), StorageError>)> = stream::iter(stale)
            .map(|path| async move {
                let result = self.storage.delete(&path).await;
                (path, result)
            })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut removed = 0;
        let mut failure = None;
        for (path, result) in results {
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(table, path = %path, error = %e, "Stale object survived overwrite");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(source) => Err(source).context(WriteFailureSnafu { table }),
            None => Ok(removed),
        }
    }
}

#[async_trait]
impl PartitionedSink for ParquetSink {
    async fn write(
        &self,
        table: &'static str,
        batch: RecordBatch,
        partition_columns: &[&str],
        mode: WriteMode,
    ) -> Result<WriteSummary, SinkError> {
        let WriteMode::Overwrite = mode;
        let start = Instant::now();
        let rows = batch.num_rows();

        let existing = self
            .storage
            .list_with_prefix(table)
            .await
            .context(WriteFailureSnafu { table })?;

        let files = self.encode(table, batch, partition_columns).await?;
        self.upload_all(table, &files).await?;

        let marker = Path::from(table).child(SUCCESS_MARKER);
        let written: HashSet<&str> = files.iter().map(|f| f.path.as_ref()).collect();
        let stale: Vec<Path> = existing
            .into_iter()
            .map(|entry| entry.path)
            .filter(|path| !written.contains(path.as_ref()) && *path != marker)
            .collect();
        let stale_removed = self.remove_stale(table, stale).await?;

        self.storage
            .put_payload(&marker, PutPayload::from(Bytes::new()))
            .await
            .context(WriteFailureSnafu { table })?;

        let bytes: usize = files.iter().map(|f| f.bytes.len()).sum();
        for file in &files {
            emit!(ParquetFileWritten {
                bytes: file.bytes.len(),
                table,
            });
        }
        emit!(RowsWritten {
            count: rows as u64,
            table,
        });
        if stale_removed > 0 {
            emit!(StaleFilesRemoved {
                count: stale_removed as u64,
                table,
            });
        }
        emit!(TableWriteCompleted {
            duration: start.elapsed(),
            table,
        });

        debug!(table, stale_removed, "Replaced table contents");
        info!(
            table,
            rows,
            files = files.len(),
            bytes,
            root = %self.storage.canonical_url(),
            "Wrote table"
        );

        Ok(WriteSummary {
            rows,
            files: files.len(),
            bytes,
            stale_removed,
        })
    }
}
