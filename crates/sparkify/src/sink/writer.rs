//! In-memory Parquet encoding with size-based file rolling.
//!
//! The writer receives one batch per partition directory. Each directory
//! change closes the current file, and a file that crosses the target size
//! is closed early and continued in a new part.

use std::time::Instant;

use bytes::Bytes;
use deltalake::arrow::array::RecordBatch;
use deltalake::arrow::datatypes::SchemaRef;
use deltalake::parquet::arrow::ArrowWriter;
use deltalake::parquet::basic::{Compression, GzipLevel, ZstdLevel};
use deltalake::parquet::file::properties::WriterProperties;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ParquetWriteSnafu, SinkError, WriterCreateSnafu, WriterUnavailableSnafu};
use sparkify_core::emit;
use sparkify_core::metrics::events::ParquetEncodeCompleted;
use sparkify_core::{MB, ParquetCompression};

/// Encoding settings for one table write.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    /// A file is closed once its encoded size reaches this many bytes.
    pub target_file_size: usize,
    /// Row groups are flushed once buffered data exceeds this many bytes.
    pub row_group_size_bytes: usize,
    pub compression: ParquetCompression,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            target_file_size: 128 * MB,
            row_group_size_bytes: 64 * MB,
            compression: ParquetCompression::Snappy,
        }
    }
}

impl ParquetWriterConfig {
    pub fn with_file_size_mb(mut self, size_mb: usize) -> Self {
        self.target_file_size = size_mb * MB;
        self.row_group_size_bytes = self.row_group_size_bytes.min(self.target_file_size);
        self
    }

    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_row_group_size_bytes(mut self, size_bytes: usize) -> Self {
        self.row_group_size_bytes = size_bytes;
        self
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4_RAW,
        };
        WriterProperties::builder().set_compression(compression).build()
    }
}

/// An encoded file ready for upload.
#[derive(Debug, Clone)]
pub struct FinishedFile {
    /// Path relative to the sink root (`songs/year=2004/…/part-….parquet`).
    pub path: Path,
    pub bytes: Bytes,
    pub record_count: usize,
}

/// Encodes batches into Parquet files below partition directories.
pub struct ParquetWriter {
    schema: SchemaRef,
    config: ParquetWriterConfig,
    properties: WriterProperties,
    /// Shared by every file of one write so parts sort together.
    job_id: Uuid,
    writer: Option<ArrowWriter<Vec<u8>>>,
    current_dir: Path,
    records_in_file: usize,
    file_started: Instant,
    next_part: usize,
    finished_files: Vec<FinishedFile>,
}

impl ParquetWriter {
    /// `schema` is the data schema, partition columns already removed.
    pub fn new(table: &str, schema: SchemaRef, config: ParquetWriterConfig) -> Self {
        let properties = config.writer_properties();
        Self {
            schema,
            config,
            properties,
            job_id: Uuid::now_v7(),
            writer: None,
            current_dir: Path::from(table),
            records_in_file: 0,
            file_started: Instant::now(),
            next_part: 0,
            finished_files: Vec::new(),
        }
    }

    /// Direct subsequent batches into `dir`, closing the open file if the
    /// directory changes.
    pub fn set_partition_dir(&mut self, dir: Path) -> Result<(), SinkError> {
        if dir != self.current_dir {
            self.roll_file()?;
            self.current_dir = dir;
        }
        Ok(())
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), SinkError> {
        if batch.num_rows() == 0 {
            return Ok(());
        }

        if self.writer.is_none() {
            let writer = ArrowWriter::try_new(
                Vec::with_capacity(MB),
                self.schema.clone(),
                Some(self.properties.clone()),
            )
            .context(WriterCreateSnafu)?;
            self.writer = Some(writer);
            self.file_started = Instant::now();
        }
        let writer = self.writer.as_mut().context(WriterUnavailableSnafu)?;

        writer.write(batch).context(ParquetWriteSnafu)?;
        self.records_in_file += batch.num_rows();

        if writer.in_progress_size() > self.config.row_group_size_bytes {
            writer.flush().context(ParquetWriteSnafu)?;
        }

        if self.current_file_size() >= self.config.target_file_size {
            debug!(
                dir = %self.current_dir,
                size = self.current_file_size(),
                records = self.records_in_file,
                "Rolling file at target size"
            );
            self.roll_file()?;
        }

        Ok(())
    }

    /// Encoded plus buffered bytes of the open file.
    pub fn current_file_size(&self) -> usize {
        self.writer
            .as_ref()
            .map(|w| w.bytes_written() + w.in_progress_size())
            .unwrap_or(0)
    }

    fn file_name(&self) -> String {
        match self.config.compression.file_tag() {
            Some(tag) => format!("part-{:05}-{}.{tag}.parquet", self.next_part, self.job_id),
            None => format!("part-{:05}-{}.parquet", self.next_part, self.job_id),
        }
    }

    fn roll_file(&mut self) -> Result<(), SinkError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let bytes = Bytes::from(writer.into_inner().context(ParquetWriteSnafu)?);

        emit!(ParquetEncodeCompleted {
            duration: self.file_started.elapsed()
        });

        let path = self.current_dir.child(self.file_name());
        debug!(path = %path, bytes = bytes.len(), records = self.records_in_file, "Encoded Parquet file");

        self.finished_files.push(FinishedFile {
            path,
            bytes,
            record_count: self.records_in_file,
        });
        self.next_part += 1;
        self.records_in_file = 0;
        Ok(())
    }

    /// Close the open file and return every finished file in write order.
    pub fn close(mut self) -> Result<Vec<FinishedFile>, SinkError> {
        self.roll_file()?;
        Ok(self.finished_files)
    }
}
