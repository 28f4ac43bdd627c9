//! Configuration for the sparkify pipeline.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::ConfigError;
use crate::sink::ParquetWriterConfig;
use sparkify_core::error::{
    EmptyPatternSnafu, EmptyRootSnafu, EnvInterpolationSnafu, NotPositiveSnafu, ReadFileSnafu,
    YamlParseSnafu,
};
pub use sparkify_core::config::{Interpolated, interpolate_with};
pub use sparkify_core::{MetricsConfig, ParquetCompression, interpolate};

/// Where the raw JSON comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Root URL of the input bucket or directory (S3, GCS, Azure, local).
    pub root: String,
    /// Song metadata files for the `songs` and `artists` tables.
    #[serde(default = "default_song_data")]
    pub song_data: String,
    /// Song metadata files for the songplay join. Defaults to `song_data`.
    #[serde(default)]
    pub songplay_song_data: Option<String>,
    /// Activity log files.
    #[serde(default = "default_log_data")]
    pub log_data: String,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Log and count malformed JSON lines instead of failing the run.
    #[serde(default)]
    pub skip_malformed_records: bool,
    /// Backend options for the source storage (credentials, region, ...).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_song_data() -> String {
    "song_data/*/*/*/*.json".to_string()
}

fn default_log_data() -> String {
    "log_data/*/*/*.json".to_string()
}

fn default_max_concurrent_files() -> usize {
    16
}

/// Where the tables go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Root URL of the output lake.
    pub root: String,
    /// Target Parquet file size in MB.
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Backend options for the sink storage.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_file_size_mb() -> usize {
    128
}

impl SinkConfig {
    pub fn writer_config(&self) -> ParquetWriterConfig {
        ParquetWriterConfig::default()
            .with_file_size_mb(self.file_size_mb)
            .with_compression(self.compression)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse configuration from YAML, interpolating the process environment.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Self::parse_interpolated(interpolate(contents))
    }

    /// Parse configuration from YAML, resolving variables with `lookup`.
    pub fn parse_with<F>(contents: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::parse_interpolated(interpolate_with(contents, lookup))
    }

    fn parse_interpolated(result: Interpolated) -> Result<Self, ConfigError> {
        ensure!(
            result.is_ok(),
            EnvInterpolationSnafu {
                errors: result.errors
            }
        );

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.root.trim().is_empty(), EmptyRootSnafu { side: "source" });
        ensure!(!self.sink.root.trim().is_empty(), EmptyRootSnafu { side: "sink" });
        ensure!(!self.source.song_data.trim().is_empty(), EmptyPatternSnafu { name: "song_data" });
        ensure!(!self.source.log_data.trim().is_empty(), EmptyPatternSnafu { name: "log_data" });
        if let Some(pattern) = &self.source.songplay_song_data {
            ensure!(
                !pattern.trim().is_empty(),
                EmptyPatternSnafu {
                    name: "songplay_song_data"
                }
            );
        }
        ensure!(
            self.source.max_concurrent_files > 0,
            NotPositiveSnafu {
                name: "max_concurrent_files"
            }
        );
        ensure!(self.sink.file_size_mb > 0, NotPositiveSnafu { name: "file_size_mb" });
        Ok(())
    }

    /// Song pattern used for the songplay join.
    pub fn songplay_song_data(&self) -> &str {
        self.source
            .songplay_song_data
            .as_deref()
            .unwrap_or(&self.source.song_data)
    }
}
