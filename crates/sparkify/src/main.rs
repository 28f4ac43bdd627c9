//! sparkify CLI: build the song-play star schema from raw JSON.

use std::path::PathBuf;

use clap::Parser;
use snafu::prelude::*;
use tracing::info;

use sparkify::error::{ConfigSnafu, InterruptedSnafu, MetricsSnafu, PipelineError};
use sparkify::tables::{ArtistRow, SongRow, SongplayRow, Table, TimeRow, UserRow};
use sparkify::{Config, Pipeline, init_metrics, init_tracing};

/// Song-play data lake builder.
#[derive(Parser, Debug)]
#[command(name = "sparkify")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate configuration and print the plan without reading or writing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("sparkify starting");
    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source: {}", config.source.root);
        info!("  song_data: {}", config.source.song_data);
        info!("  songplay_song_data: {}", config.songplay_song_data());
        info!("  log_data: {}", config.source.log_data);
        info!("Sink: {}", config.sink.root);
        info!(
            "  file_size_mb: {}, compression: {:?}",
            config.sink.file_size_mb, config.sink.compression
        );
        for (name, partitions) in [
            (SongRow::NAME, SongRow::PARTITION_COLUMNS),
            (ArtistRow::NAME, ArtistRow::PARTITION_COLUMNS),
            (UserRow::NAME, UserRow::PARTITION_COLUMNS),
            (TimeRow::NAME, TimeRow::PARTITION_COLUMNS),
            (SongplayRow::NAME, SongplayRow::PARTITION_COLUMNS),
        ] {
            info!("  - {name}/ partitioned by {partitions:?}");
        }
        info!("Configuration is valid");
        return Ok(());
    }

    init_metrics(config.metrics.address.as_deref()).context(MetricsSnafu)?;

    let pipeline = Pipeline::from_config(&config).await?;
    let stats = tokio::select! {
        result = pipeline.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, abandoning run");
            return InterruptedSnafu.fail();
        }
    };

    info!("Pipeline completed successfully");
    info!("  Song records read: {}", stats.song_records);
    info!("  Log records read: {}", stats.log_records);
    info!("  NextSong events: {}", stats.next_song_events);
    info!("  Unmatched songplay events: {}", stats.unmatched_events);
    for (table, summary) in &stats.tables {
        info!(
            "  {table}: {} rows in {} files ({} bytes)",
            summary.rows, summary.files, summary.bytes
        );
    }

    Ok(())
}
