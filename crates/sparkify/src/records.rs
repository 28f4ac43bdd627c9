//! Typed input records.
//!
//! One JSON object per line. Unknown fields are ignored; missing optional
//! fields decode to `None`. A required field that is missing or has the
//! wrong type surfaces as a data error and is reported as a shape error by
//! the reader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One song-metadata file entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SongMetadataRecord {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
    pub year: i32,
    pub duration: f64,
    #[serde(default)]
    pub num_songs: Option<i64>,
}

/// One raw activity-log line.
///
/// Only `page` and `ts` are required. Everything else is optional here and
/// validated later for the events that need it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEventRecord {
    pub page: String,
    pub ts: i64,
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub item_in_session: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub registration: Option<f64>,
}

/// A `NextSong` log event with its user and session present and its
/// timestamp resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
    pub ts: i64,
    pub start_time: DateTime<Utc>,
    pub artist: Option<String>,
    pub song: Option<String>,
    pub length: Option<f64>,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

/// User ids appear as strings in the logs, occasionally as numbers. An empty
/// string is how logged-out events carry "no user".
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(match value {
        None => None,
        Some(StringOrNumber::String(s)) if s.trim().is_empty() => None,
        Some(StringOrNumber::String(s)) => Some(s),
        Some(StringOrNumber::Int(n)) => Some(n.to_string()),
        Some(StringOrNumber::Float(f)) if f.fract() == 0.0 => Some(format!("{f:.0}")),
        Some(StringOrNumber::Float(f)) => Some(f.to_string()),
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<StringOrNumber>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(StringOrNumber::Int(n)) => Ok(Some(n)),
        Some(StringOrNumber::String(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected an integer, got \"{s}\""))),
        Some(StringOrNumber::Float(f)) if f.fract() == 0.0 => Ok(Some(f as i64)),
        Some(StringOrNumber::Float(f)) => {
            Err(D::Error::custom(format!("expected an integer, got {f}")))
        }
    }
}
