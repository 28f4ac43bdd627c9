//! The songplay fact table: `NextSong` events joined to song metadata.
//!
//! The join is an inner equi-join on `(artist_name, title, duration)`:
//! strings compare case-sensitively and durations with exact `f64`
//! equality. An event with several matching songs yields one row per song.
//! Events with no match are counted and dropped.

use std::collections::HashMap;

use chrono::Datelike;
use snafu::prelude::*;

use crate::error::{IdSpaceExhaustedSnafu, SourceError};
use crate::records::{PlayEvent, SongMetadataRecord};
use crate::source::Shard;
use crate::tables::SongplayRow;

/// Bits reserved for the row index within one shard.
const ROW_BITS: u32 = 33;

/// Rows one shard can number.
pub const MAX_ROWS_PER_SHARD: i64 = 1 << ROW_BITS;

/// Shards one run can number; the shard index fills the remaining 30
/// non-sign bits.
pub const MAX_SHARDS: usize = 1 << (63 - ROW_BITS);

/// Exact-match key for a duration. `-0.0` folds into `0.0`; NaN has no key
/// and so never joins.
fn duration_key(value: f64) -> Option<u64> {
    if value.is_nan() {
        None
    } else if value == 0.0 {
        Some(0f64.to_bits())
    } else {
        Some(value.to_bits())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JoinKey {
    artist_name: String,
    title: String,
    duration: u64,
}

/// Song metadata indexed by join key.
#[derive(Debug, Default)]
pub struct SongIndex<'a> {
    songs: HashMap<JoinKey, Vec<&'a SongMetadataRecord>>,
}

impl<'a> SongIndex<'a> {
    pub fn build(shards: &'a [Shard<SongMetadataRecord>]) -> Self {
        let mut songs: HashMap<JoinKey, Vec<&'a SongMetadataRecord>> = HashMap::new();
        for song in shards.iter().flat_map(|shard| &shard.records) {
            let Some(duration) = duration_key(song.duration) else {
                continue;
            };
            let key = JoinKey {
                artist_name: song.artist_name.clone(),
                title: song.title.clone(),
                duration,
            };
            songs.entry(key).or_default().push(song);
        }
        Self { songs }
    }

    /// Songs matching exactly, in scan order.
    pub fn lookup(&self, artist_name: &str, title: &str, duration: f64) -> &[&'a SongMetadataRecord] {
        let Some(duration) = duration_key(duration) else {
            return &[];
        };
        let key = JoinKey {
            artist_name: artist_name.to_string(),
            title: title.to_string(),
            duration,
        };
        self.songs.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of distinct join keys.
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

/// Songplay id generator for one shard.
///
/// Ids are `(shard_index << 33) + row`, so they never collide across shards
/// and increase through a run. They depend on the input layout and are not
/// stable between runs over different inputs.
///
/// At most [`MAX_SHARDS`] shards of [`MAX_ROWS_PER_SHARD`] rows each fit.
#[derive(Debug)]
pub struct SurrogateIds {
    base: i64,
    next: i64,
}

impl SurrogateIds {
    /// `None` when `shard_index` is at or past [`MAX_SHARDS`].
    pub fn for_shard(shard_index: usize) -> Option<Self> {
        if shard_index >= MAX_SHARDS {
            return None;
        }
        Some(Self {
            base: (shard_index as i64) << ROW_BITS,
            next: 0,
        })
    }

    /// `None` once the shard has used all [`MAX_ROWS_PER_SHARD`] ids.
    pub fn next_id(&mut self) -> Option<i64> {
        if self.next >= MAX_ROWS_PER_SHARD {
            return None;
        }
        let id = self.base + self.next;
        self.next += 1;
        Some(id)
    }
}

/// Join output.
#[derive(Debug, Default)]
pub struct SongplayJoin {
    pub rows: Vec<SongplayRow>,
    /// `NextSong` events that matched no song.
    pub unmatched_events: usize,
}

pub fn to_songplays(
    events: &[Shard<PlayEvent>],
    songs: &SongIndex<'_>,
) -> Result<SongplayJoin, SourceError> {
    let mut join = SongplayJoin::default();

    for (shard_index, shard) in events.iter().enumerate() {
        let exhausted = || IdSpaceExhaustedSnafu {
            path: shard.path.as_str(),
            shard_index,
        };
        let mut ids = SurrogateIds::for_shard(shard_index).context(exhausted())?;

        for event in &shard.records {
            let matches = match (&event.artist, &event.song, event.length) {
                (Some(artist), Some(song), Some(length)) => songs.lookup(artist, song, length),
                _ => &[],
            };
            if matches.is_empty() {
                join.unmatched_events += 1;
                continue;
            }

            for song in matches {
                join.rows.push(SongplayRow {
                    songplay_id: ids.next_id().context(exhausted())?,
                    start_time: event.start_time,
                    user_id: event.user_id.clone(),
                    level: event.level.clone(),
                    song_id: song.song_id.clone(),
                    artist_id: song.artist_id.clone(),
                    session_id: event.session_id,
                    location: event.location.clone(),
                    user_agent: event.user_agent.clone(),
                    year: event.start_time.year(),
                    month: event.start_time.month() as i32,
                });
            }
        }
    }

    Ok(join)
}
