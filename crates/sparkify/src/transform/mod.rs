//! Pure record-to-row transformations.
//!
//! Nothing here touches storage. Inputs arrive as shards in scan order and
//! every function is deterministic for a given input order.

mod logs;
mod songplays;
mod songs;

pub use logs::{NEXT_SONG, calendar, filter_next_song, start_time_from_ts, to_time, to_users};
pub use songplays::{
    MAX_ROWS_PER_SHARD, MAX_SHARDS, SongIndex, SongplayJoin, SurrogateIds, to_songplays,
};
pub use songs::{to_artists, to_songs};

use std::hash::Hash;

use indexmap::IndexMap;
use indexmap::map::Entry;

/// Keep one row per key: the first one seen.
///
/// Output order is first-occurrence order.
pub fn dedup_by_key<T, K, F>(rows: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut kept: IndexMap<K, T> = IndexMap::new();
    for row in rows {
        if let Entry::Vacant(slot) = kept.entry(key(&row)) {
            slot.insert(row);
        }
    }
    kept.into_values().collect()
}
