//! sparkify-core: shared plumbing for the sparkify lake pipeline.
//!
//! - `storage/` - storage abstraction over S3, GCS, Azure and local disk
//! - `metrics/` - metric events and the Prometheus recorder
//! - `config/` - byte units, compression, metrics config, env interpolation
//! - `partition` - Hive-style partition directory encoding
//! - `tracing` - subscriber initialisation
//! - `error` - storage, config and metrics errors

pub mod config;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod storage;
pub mod tracing;

pub use config::{KB, MB, MetricsConfig, ParquetCompression, interpolate};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsController, init_global as init_metrics, init_test as init_metrics_test};
pub use partition::{NULL_PARTITION_VALUE, parse_partition_values, partition_dir};
pub use storage::{ObjectEntry, StorageProvider, StorageProviderRef};
pub use tracing::init_tracing;
