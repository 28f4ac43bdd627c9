//! User and time dimensions from the activity log.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::SourceError;
use crate::records::{LogEventRecord, PlayEvent};
use crate::source::Shard;
use crate::tables::{TimeRow, UserRow};

use super::dedup_by_key;

/// The page value of a song play.
pub const NEXT_SONG: &str = "NextSong";

/// Second-precision UTC instant for an epoch-millisecond timestamp.
///
/// The millisecond remainder is discarded by flooring, so instants before
/// the epoch round down like the ones after it. `None` when out of range.
pub fn start_time_from_ts(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.div_euclid(1000), 0)
}

/// Keep `NextSong` events and validate the fields every consumer needs.
///
/// Shard boundaries are kept so ids can be assigned per shard later. A
/// `NextSong` event without a user id or session id is a shape error.
pub fn filter_next_song(shards: Vec<Shard<LogEventRecord>>) -> Result<Vec<Shard<PlayEvent>>, SourceError> {
    shards
        .into_iter()
        .map(|shard| {
            let Shard { path, records, lines } = shard;
            let mut events = Vec::new();
            let mut event_lines = Vec::new();
            for (index, record) in records.into_iter().enumerate() {
                if record.page != NEXT_SONG {
                    continue;
                }
                let line = lines.get(index).copied().unwrap_or(index + 1);
                events.push(play_event(record, || format!("{path}:{line}"))?);
                event_lines.push(line);
            }
            Ok::<_, SourceError>(Shard::with_lines(path, events, event_lines))
        })
        .collect()
}

fn play_event(record: LogEventRecord, location: impl Fn() -> String) -> Result<PlayEvent, SourceError> {
    let shape = |message: &str| SourceError::RecordShape {
        location: location(),
        message: message.to_string(),
    };

    let user_id = record.user_id.ok_or_else(|| shape("NextSong event without userId"))?;
    let session_id = record
        .session_id
        .ok_or_else(|| shape("NextSong event without sessionId"))?;
    let start_time = start_time_from_ts(record.ts)
        .ok_or_else(|| shape(&format!("ts {} is out of range", record.ts)))?;

    Ok(PlayEvent {
        user_id,
        first_name: record.first_name,
        last_name: record.last_name,
        gender: record.gender,
        level: record.level,
        ts: record.ts,
        start_time,
        artist: record.artist,
        song: record.song,
        length: record.length,
        session_id,
        location: record.location,
        user_agent: record.user_agent,
    })
}

/// One `users` row per `user_id`, first event in scan order wins.
///
/// A user who upgrades mid-log keeps the level of their earliest event.
pub fn to_users(shards: &[Shard<PlayEvent>]) -> Vec<UserRow> {
    let rows = shards
        .iter()
        .flat_map(|shard| &shard.records)
        .map(|e| UserRow {
            user_id: e.user_id.clone(),
            first_name: e.first_name.clone(),
            last_name: e.last_name.clone(),
            gender: e.gender.clone(),
            level: e.level.clone(),
        });
    dedup_by_key(rows, |row| row.user_id.clone())
}

/// Calendar decomposition of one instant.
///
/// `week` is the ISO-8601 week number. `weekday` counts 1 = Sunday through
/// 7 = Saturday.
pub fn calendar(start_time: DateTime<Utc>) -> TimeRow {
    TimeRow {
        start_time,
        hour: start_time.hour() as i32,
        day: start_time.day() as i32,
        week: start_time.iso_week().week() as i32,
        month: start_time.month() as i32,
        year: start_time.year(),
        weekday: start_time.weekday().number_from_sunday() as i32,
    }
}

/// One `time` row per distinct `start_time`.
pub fn to_time(shards: &[Shard<PlayEvent>]) -> Vec<TimeRow> {
    let instants = shards
        .iter()
        .flat_map(|shard| &shard.records)
        .map(|e| e.start_time);
    dedup_by_key(instants, |t| *t)
        .into_iter()
        .map(calendar)
        .collect()
}
