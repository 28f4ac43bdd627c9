//! sparkify: song-play logs and song metadata into a Parquet star schema.
//!
//! Reads newline-delimited JSON song metadata and activity logs from object
//! storage (S3, GCS, Azure or local disk), builds four dimension tables
//! (`songs`, `artists`, `users`, `time`) and one fact table (`songplays`), and
//! overwrites them as Hive-partitioned Parquet under the sink root.
//!
//! - `records` - typed input records
//! - `source/` - glob listing and NDJSON decoding
//! - `transform/` - the pure table transforms and the songplay join
//! - `tables` - row structs and Arrow schemas
//! - `sink/` - partition splitting, Parquet encoding and overwrite
//! - `pipeline/` - phase sequencing and run statistics

pub mod config;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod sink;
pub mod source;
pub mod tables;
pub mod transform;

pub use config::Config;
pub use error::{PipelineError, SinkError, SourceError};
pub use pipeline::{DatasetPatterns, Pipeline, PipelineStats};
pub use records::{LogEventRecord, PlayEvent, SongMetadataRecord};
pub use sink::{ParquetSink, PartitionedSink, WriteMode, WriteSummary};
pub use source::{RecordSource, Shard, StorageRecordSource};
pub use tables::{ArtistRow, SongRow, SongplayRow, Table, TimeRow, UserRow};
pub use sparkify_core::{init_metrics, init_metrics_test, init_tracing};
