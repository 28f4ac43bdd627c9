//! Batch pipeline: song data, then log data, then songplays.
//!
//! Each phase reads its inputs, transforms them in memory and writes two
//! tables (one for the last phase) concurrently. Phases run in order, and a
//! phase reports its first failed write only after both writes have ended.

use std::collections::BTreeMap;
use std::time::Instant;

use snafu::prelude::*;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ArrowSnafu, PipelineError};
use crate::records::{LogEventRecord, PlayEvent, SongMetadataRecord};
use crate::sink::{ParquetSink, PartitionedSink, WriteMode, WriteSummary};
use crate::source::{RecordSource, Shard, StorageRecordSource, record_count};
use crate::tables::{ArtistRow, SongRow, SongplayRow, Table, TimeRow, UserRow};
use crate::transform::{
    SongIndex, filter_next_song, to_artists, to_songplays, to_songs, to_time, to_users,
};
use sparkify_core::emit;
use sparkify_core::metrics::events::SongplaysUnmatched;

/// Input path patterns, relative to the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPatterns {
    /// Song files for the `songs` and `artists` tables.
    pub song_data: String,
    /// Song files for the songplay join.
    pub songplay_song_data: String,
    pub log_data: String,
}

impl Default for DatasetPatterns {
    fn default() -> Self {
        Self {
            song_data: "song_data/*/*/*/*.json".to_string(),
            songplay_song_data: "song_data/*/*/*/*.json".to_string(),
            log_data: "log_data/*/*/*.json".to_string(),
        }
    }
}

impl From<&Config> for DatasetPatterns {
    fn from(config: &Config) -> Self {
        Self {
            song_data: config.source.song_data.clone(),
            songplay_song_data: config.songplay_song_data().to_string(),
            log_data: config.source.log_data.clone(),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Song records read for the dimension tables.
    pub song_records: usize,
    /// Song records read for the join.
    pub songplay_song_records: usize,
    pub log_records: usize,
    pub next_song_events: usize,
    /// `NextSong` events with no matching song.
    pub unmatched_events: usize,
    /// Write outcome per table name.
    pub tables: BTreeMap<&'static str, WriteSummary>,
}

impl PipelineStats {
    /// Rows written to `table`, zero if it was not written.
    pub fn rows(&self, table: &str) -> usize {
        self.tables.get(table).map(|s| s.rows).unwrap_or_default()
    }

    pub fn files_written(&self) -> usize {
        self.tables.values().map(|s| s.files).sum()
    }

    pub fn bytes_written(&self) -> usize {
        self.tables.values().map(|s| s.bytes).sum()
    }
}

/// Wires a record source to a sink through the five table transforms.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    patterns: DatasetPatterns,
}

impl Pipeline<StorageRecordSource, ParquetSink> {
    /// Build the storage-backed pipeline described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let source = StorageRecordSource::new(
            &config.source.root,
            config.source.storage_options.clone(),
        )
        .await?
        .with_max_concurrent_files(config.source.max_concurrent_files)
        .with_skip_malformed(config.source.skip_malformed_records);

        let sink = ParquetSink::new(
            &config.sink.root,
            config.sink.storage_options.clone(),
            config.sink.writer_config(),
        )
        .await?;

        info!(
            source = %source.storage().canonical_url(),
            sink = %sink.storage().canonical_url(),
            "Pipeline storage ready"
        );

        Ok(Self::new(source, sink).with_patterns(DatasetPatterns::from(config)))
    }
}

impl<S, K> Pipeline<S, K>
where
    S: RecordSource,
    K: PartitionedSink,
{
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            sink,
            patterns: DatasetPatterns::default(),
        }
    }

    pub fn with_patterns(mut self, patterns: DatasetPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn patterns(&self) -> &DatasetPatterns {
        &self.patterns
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run all three phases and return the counters.
    pub async fn run(&self) -> Result<PipelineStats, PipelineError> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();

        self.process_song_data(&mut stats).await?;
        let events = self.process_log_data(&mut stats).await?;
        self.process_songplays(&events, &mut stats).await?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            files = stats.files_written(),
            bytes = stats.bytes_written(),
            "Pipeline run complete"
        );
        Ok(stats)
    }

    /// Phase A: `songs` and `artists`.
    async fn process_song_data(&self, stats: &mut PipelineStats) -> Result<(), PipelineError> {
        info!(pattern = %self.patterns.song_data, "Processing song data");
        let shards: Vec<Shard<SongMetadataRecord>> =
            self.source.read(&self.patterns.song_data).await?;
        stats.song_records = record_count(&shards);

        let songs = to_songs(&shards);
        let artists = to_artists(&shards);
        // Both writes always finish, so a failure never abandons the sibling
        // mid-upload.
        let (songs, artists) = tokio::join!(self.write_table(&songs), self.write_table(&artists));
        let (songs, artists) = (songs?, artists?);

        stats.tables.insert(SongRow::NAME, songs);
        stats.tables.insert(ArtistRow::NAME, artists);
        Ok(())
    }

    /// Phase B: `users` and `time`. Returns the validated play events for
    /// the join.
    async fn process_log_data(
        &self,
        stats: &mut PipelineStats,
    ) -> Result<Vec<Shard<PlayEvent>>, PipelineError> {
        info!(pattern = %self.patterns.log_data, "Processing log data");
        let shards: Vec<Shard<LogEventRecord>> = self.source.read(&self.patterns.log_data).await?;
        stats.log_records = record_count(&shards);

        let events = filter_next_song(shards)?;
        stats.next_song_events = record_count(&events);

        let users = to_users(&events);
        let time = to_time(&events);
        let (users, time) = tokio::join!(self.write_table(&users), self.write_table(&time));
        let (users, time) = (users?, time?);

        stats.tables.insert(UserRow::NAME, users);
        stats.tables.insert(TimeRow::NAME, time);
        Ok(events)
    }

    /// Phase C: `songplays`, from a fresh read of song data.
    async fn process_songplays(
        &self,
        events: &[Shard<PlayEvent>],
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        info!(pattern = %self.patterns.songplay_song_data, "Joining songplays");
        let songs: Vec<Shard<SongMetadataRecord>> =
            self.source.read(&self.patterns.songplay_song_data).await?;
        stats.songplay_song_records = record_count(&songs);

        let index = SongIndex::build(&songs);
        let join = to_songplays(events, &index)?;

        stats.unmatched_events = join.unmatched_events;
        emit!(SongplaysUnmatched {
            count: join.unmatched_events as u64,
        });
        if join.unmatched_events > 0 {
            warn!(
                unmatched = join.unmatched_events,
                events = stats.next_song_events,
                "NextSong events without matching song metadata were dropped"
            );
        }

        let songplays = self.write_table(&join.rows).await?;
        stats.tables.insert(SongplayRow::NAME, songplays);
        Ok(())
    }

    async fn write_table<T: Table>(&self, rows: &[T]) -> Result<WriteSummary, PipelineError> {
        let batch = T::to_record_batch(rows).context(ArrowSnafu { table: T::NAME })?;
        let summary = self
            .sink
            .write(T::NAME, batch, T::PARTITION_COLUMNS, WriteMode::Overwrite)
            .await?;
        Ok(summary)
    }
}
