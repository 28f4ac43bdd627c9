//! Record sources.
//!
//! A source turns a path pattern into an ordered sequence of [`Shard`]s, one
//! per matched file, each holding that file's decoded records.

mod pattern;
mod reader;
mod storage;

pub use pattern::PathPattern;
pub use reader::NdjsonReader;
pub use storage::StorageRecordSource;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::error::SourceError;

/// The records of one input file.
///
/// Shard order is scan order: dedup keeps the first occurrence in it and
/// songplay ids are assigned per shard index.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard<T> {
    /// Path relative to the source root.
    pub path: String,
    pub records: Vec<T>,
    /// 1-based source line of each record.
    pub lines: Vec<usize>,
}

impl<T> Shard<T> {
    /// A shard whose records sit on consecutive lines from 1.
    pub fn new(path: impl Into<String>, records: Vec<T>) -> Self {
        let lines = (1..=records.len()).collect();
        Self::with_lines(path, records, lines)
    }

    pub fn with_lines(path: impl Into<String>, records: Vec<T>, lines: Vec<usize>) -> Self {
        debug_assert_eq!(records.len(), lines.len());
        Self {
            path: path.into(),
            records,
            lines,
        }
    }

    /// `path:line` of the record at `index`.
    pub fn location(&self, index: usize) -> String {
        let line = self.lines.get(index).copied().unwrap_or(index + 1);
        format!("{}:{line}", self.path)
    }
}

/// Count records across shards.
pub fn record_count<T>(shards: &[Shard<T>]) -> usize {
    shards.iter().map(|s| s.records.len()).sum()
}

/// Reads typed records matching a path pattern.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Lazily yield one shard per matched file, in path order.
    ///
    /// The first item is an error when the location is unreachable or
    /// nothing matches.
    fn stream<T>(&self, pattern: &str) -> BoxStream<'_, Result<Shard<T>, SourceError>>
    where
        T: DeserializeOwned + Send + 'static;

    /// Read every matched shard.
    async fn read<T>(&self, pattern: &str) -> Result<Vec<Shard<T>>, SourceError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.stream::<T>(pattern).try_collect().await
    }
}
