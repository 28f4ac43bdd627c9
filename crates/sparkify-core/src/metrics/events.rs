//! Internal events for sparkify metrics emission.
//!
//! Each struct is one measurable occurrence in a pipeline run. Events carry a
//! `table` or `dataset` label so the five output tables can be told apart.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Records parsed from one source file.
pub struct RecordsRead {
    pub count: u64,
    /// Dataset label (e.g. "song_data", "log_data").
    pub dataset: String,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, dataset = %self.dataset, "Records read");
        counter!("sparkify_records_read_total", "dataset" => self.dataset).increment(self.count);
    }
}

/// Source file fetched and parsed.
pub struct SourceFileRead {
    pub bytes: u64,
    pub dataset: String,
}

impl InternalEvent for SourceFileRead {
    fn emit(self) {
        trace!(bytes = self.bytes, dataset = %self.dataset, "Source file read");
        counter!("sparkify_source_files_read_total", "dataset" => self.dataset.clone())
            .increment(1);
        counter!("sparkify_bytes_read_total", "dataset" => self.dataset).increment(self.bytes);
    }
}

/// Malformed source line skipped instead of aborting the run.
pub struct MalformedRecordSkipped {
    pub dataset: String,
}

impl InternalEvent for MalformedRecordSkipped {
    fn emit(self) {
        trace!(dataset = %self.dataset, "Malformed record skipped");
        counter!("sparkify_malformed_records_skipped_total", "dataset" => self.dataset)
            .increment(1);
    }
}

/// Rows written to an output table.
pub struct RowsWritten {
    pub count: u64,
    pub table: &'static str,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(count = self.count, table = self.table, "Rows written");
        counter!("sparkify_rows_written_total", "table" => self.table).increment(self.count);
    }
}

/// Parquet file uploaded to the sink.
pub struct ParquetFileWritten {
    pub bytes: usize,
    pub table: &'static str,
}

impl InternalEvent for ParquetFileWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, table = self.table, "Parquet file written");
        counter!("sparkify_parquet_files_written_total", "table" => self.table).increment(1);
        counter!("sparkify_bytes_written_total", "table" => self.table)
            .increment(self.bytes as u64);
    }
}

/// Stale object removed by an overwrite.
pub struct StaleFilesRemoved {
    pub count: u64,
    pub table: &'static str,
}

impl InternalEvent for StaleFilesRemoved {
    fn emit(self) {
        trace!(count = self.count, table = self.table, "Stale files removed");
        counter!("sparkify_stale_files_removed_total", "table" => self.table)
            .increment(self.count);
    }
}

/// `NextSong` events that found no song metadata and produced no songplay.
pub struct SongplaysUnmatched {
    pub count: u64,
}

impl InternalEvent for SongplaysUnmatched {
    fn emit(self) {
        trace!(count = self.count, "Songplay events unmatched");
        counter!("sparkify_songplay_events_unmatched_total").increment(self.count);
    }
}

/// Full overwrite of one table completed.
pub struct TableWriteCompleted {
    pub duration: Duration,
    pub table: &'static str,
}

impl InternalEvent for TableWriteCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            table = self.table,
            "Table write completed"
        );
        histogram!("sparkify_table_write_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Parquet encoding of one file completed.
pub struct ParquetEncodeCompleted {
    pub duration: Duration,
}

impl InternalEvent for ParquetEncodeCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Parquet encode completed");
        histogram!("sparkify_parquet_encode_duration_seconds").record(self.duration.as_secs_f64());
    }
}
