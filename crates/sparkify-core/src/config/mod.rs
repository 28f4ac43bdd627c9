//! Configuration primitives shared across sparkify crates.

mod vars;

pub use vars::{Interpolated, interpolate, interpolate_with};

use serde::{Deserialize, Serialize};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server (e.g. "0.0.0.0:9090").
    /// When unset, metrics are recorded but not served.
    #[serde(default)]
    pub address: Option<String>,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl ParquetCompression {
    /// Codec tag used in output file names (`part-00000-<uuid>.snappy.parquet`).
    pub fn file_tag(self) -> Option<&'static str> {
        match self {
            ParquetCompression::Uncompressed => None,
            ParquetCompression::Snappy => Some("snappy"),
            ParquetCompression::Gzip => Some("gz"),
            ParquetCompression::Zstd => Some("zstd"),
            ParquetCompression::Lz4 => Some("lz4"),
        }
    }
}
