use crate::records::SongMetadataRecord;
use crate::source::Shard;
use crate::tables::{ArtistRow, SongRow};

use super::dedup_by_key;

/// Project every song record into a `songs` row. No dedup.
pub fn to_songs(shards: &[Shard<SongMetadataRecord>]) -> Vec<SongRow> {
    shards
        .iter()
        .flat_map(|shard| &shard.records)
        .map(|r| SongRow {
            song_id: r.song_id.clone(),
            title: r.title.clone(),
            artist_id: r.artist_id.clone(),
            year: r.year,
            duration: r.duration,
        })
        .collect()
}

/// Project and rename artist fields, one row per `artist_id`.
///
/// When records disagree for the same artist, the first record in scan
/// order wins.
pub fn to_artists(shards: &[Shard<SongMetadataRecord>]) -> Vec<ArtistRow> {
    let rows = shards
        .iter()
        .flat_map(|shard| &shard.records)
        .map(|r| ArtistRow {
            artist_id: r.artist_id.clone(),
            name: r.artist_name.clone(),
            location: r.artist_location.clone(),
            latitude: r.artist_latitude,
            longitude: r.artist_longitude,
        });
    dedup_by_key(rows, |row| row.artist_id.clone())
}
