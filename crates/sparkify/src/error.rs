//! Error types for the sparkify pipeline.

use deltalake::arrow::error::ArrowError;
use deltalake::parquet::errors::ParquetError;
use snafu::prelude::*;

pub use sparkify_core::error::{ConfigError, MetricsError, StorageError};

/// Errors raised while locating and decoding input records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source location could not be listed.
    #[snafu(display("Source unavailable for pattern '{pattern}': {source}"))]
    Unavailable {
        pattern: String,
        source: StorageError,
    },

    /// Listing succeeded but nothing matched the pattern.
    #[snafu(display("No files match pattern '{pattern}' under {root}"))]
    NoMatchingFiles { pattern: String, root: String },

    /// The path pattern could not be compiled.
    #[snafu(display("Invalid path pattern '{pattern}': {source}"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    /// A matched file could not be fetched.
    #[snafu(display("Failed to read {path}: {source}"))]
    Fetch { path: String, source: StorageError },

    /// A line is not valid JSON.
    #[snafu(display("Malformed record at {path}:{line}: {source}"))]
    RecordParse {
        path: String,
        line: usize,
        source: serde_json::Error,
    },

    /// A record is valid JSON but lacks a required field or has the wrong type.
    #[snafu(display("Record at {location} has an invalid shape: {message}"))]
    RecordShape { location: String, message: String },

    /// A shard's position or size does not fit the songplay id layout.
    #[snafu(display("Shard {path} (index {shard_index}) exceeds the songplay id space"))]
    IdSpaceExhausted { path: String, shard_index: usize },
}

impl SourceError {
    /// True for the "source unreachable or empty" family.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable { .. } | SourceError::NoMatchingFiles { .. }
        )
    }
}

/// Errors raised while encoding and persisting a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to build an Arrow batch from rows or to split it by partition.
    #[snafu(display("Failed to build Arrow data for table '{table}': {source}"))]
    Arrow {
        table: &'static str,
        source: ArrowError,
    },

    /// A partition column is not part of the table schema.
    #[snafu(display("Table '{table}' has no partition column '{column}'"))]
    MissingPartitionColumn { table: &'static str, column: String },

    /// Failed to create the Parquet writer.
    #[snafu(display("Failed to create Parquet writer: {source}"))]
    WriterCreate { source: ParquetError },

    /// Failed to encode Parquet data.
    #[snafu(display("Failed to write Parquet data: {source}"))]
    ParquetWrite { source: ParquetError },

    /// The blocking encode task panicked or was cancelled.
    #[snafu(display("Encoding task for table '{table}' failed: {source}"))]
    EncodeTask {
        table: &'static str,
        source: tokio::task::JoinError,
    },

    /// Writer used after it was closed.
    #[snafu(display("Parquet writer unavailable (already closed)"))]
    WriterUnavailable,

    /// The destination could not be written or cleaned up.
    #[snafu(display("Write to table '{table}' failed: {source}"))]
    WriteFailure {
        table: &'static str,
        source: StorageError,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage setup error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Reading input records failed.
    #[snafu(display("Source error: {source}"))]
    Source { source: SourceError },

    /// Writing an output table failed.
    #[snafu(display("Sink error: {source}"))]
    Sink { source: SinkError },

    /// Metrics setup failed.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// The run was interrupted by a shutdown signal.
    #[snafu(display("Pipeline interrupted by shutdown signal"))]
    Interrupted,
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<SourceError> for PipelineError {
    fn from(source: SourceError) -> Self {
        PipelineError::Source { source }
    }
}

impl From<SinkError> for PipelineError {
    fn from(source: SinkError) -> Self {
        PipelineError::Sink { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}
