//! Output table rows and their Arrow schemas.
//!
//! Every table is a plain row struct. [`Table`] knows the table's directory
//! name, its schema (partition columns included) and how to turn a slice of
//! rows into one [`RecordBatch`]. The sink removes the partition columns from
//! the data files and encodes them in the directory path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use deltalake::arrow::array::{
    ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use deltalake::arrow::error::ArrowError;

/// Timezone attached to every timestamp column.
pub const UTC: &str = "UTC";

/// A table written by the pipeline.
pub trait Table: Sized + Send + Sync {
    /// Directory name below the sink root.
    const NAME: &'static str;

    /// Hive partition columns, outermost first.
    const PARTITION_COLUMNS: &'static [&'static str];

    /// Full schema, partition columns included.
    fn schema() -> SchemaRef;

    /// Build one batch holding `rows` in order.
    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError>;
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

fn utf8<'a>(rows: impl Iterator<Item = Option<&'a String>>) -> ArrayRef {
    Arc::new(StringArray::from_iter(rows))
}

fn timestamps(rows: impl Iterator<Item = DateTime<Utc>>) -> ArrayRef {
    let micros: Vec<i64> = rows.map(|t| t.timestamp_micros()).collect();
    Arc::new(TimestampMicrosecondArray::from(micros).with_timezone(UTC))
}

/// `songs/`: one row per song record.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i32,
    pub duration: f64,
}

impl Table for SongRow {
    const NAME: &'static str = "songs";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "artist_id"];

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("song_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("artist_id", DataType::Utf8, false),
            Field::new("year", DataType::Int32, false),
            Field::new("duration", DataType::Float64, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| Some(&r.song_id))),
                utf8(rows.iter().map(|r| Some(&r.title))),
                utf8(rows.iter().map(|r| Some(&r.artist_id))),
                Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.year))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.duration))),
            ],
        )
    }
}

/// `artists/`: one row per distinct artist id.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Table for ArtistRow {
    const NAME: &'static str = "artists";
    const PARTITION_COLUMNS: &'static [&'static str] = &[];

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("artist_id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("location", DataType::Utf8, true),
            Field::new("latitude", DataType::Float64, true),
            Field::new("longitude", DataType::Float64, true),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| Some(&r.artist_id))),
                utf8(rows.iter().map(|r| Some(&r.name))),
                utf8(rows.iter().map(|r| r.location.as_ref())),
                Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.latitude))),
                Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.longitude))),
            ],
        )
    }
}

/// `users/`: one row per distinct user id.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

impl Table for UserRow {
    const NAME: &'static str = "users";
    const PARTITION_COLUMNS: &'static [&'static str] = &[];

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Utf8, false),
            Field::new("first_name", DataType::Utf8, true),
            Field::new("last_name", DataType::Utf8, true),
            Field::new("gender", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| Some(&r.user_id))),
                utf8(rows.iter().map(|r| r.first_name.as_ref())),
                utf8(rows.iter().map(|r| r.last_name.as_ref())),
                utf8(rows.iter().map(|r| r.gender.as_ref())),
                utf8(rows.iter().map(|r| r.level.as_ref())),
            ],
        )
    }
}

/// `time/`: one row per distinct start time.
///
/// `weekday` counts from Sunday: 1 = Sunday … 7 = Saturday.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRow {
    pub start_time: DateTime<Utc>,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    pub weekday: i32,
}

impl Table for TimeRow {
    const NAME: &'static str = "time";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "month"];

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("start_time", timestamp_type(), false),
            Field::new("hour", DataType::Int32, false),
            Field::new("day", DataType::Int32, false),
            Field::new("week", DataType::Int32, false),
            Field::new("month", DataType::Int32, false),
            Field::new("year", DataType::Int32, false),
            Field::new("weekday", DataType::Int32, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let ints = |f: fn(&TimeRow) -> i32| -> ArrayRef {
            Arc::new(Int32Array::from_iter_values(rows.iter().map(f)))
        };
        RecordBatch::try_new(
            Self::schema(),
            vec![
                timestamps(rows.iter().map(|r| r.start_time)),
                ints(|r| r.hour),
                ints(|r| r.day),
                ints(|r| r.week),
                ints(|r| r.month),
                ints(|r| r.year),
                ints(|r| r.weekday),
            ],
        )
    }
}

/// `songplays/`: one row per matched `NextSong` event and song.
#[derive(Debug, Clone, PartialEq)]
pub struct SongplayRow {
    pub songplay_id: i64,
    pub start_time: DateTime<Utc>,
    pub user_id: String,
    pub level: Option<String>,
    pub song_id: String,
    pub artist_id: String,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    pub year: i32,
    pub month: i32,
}

impl Table for SongplayRow {
    const NAME: &'static str = "songplays";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "month"];

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("songplay_id", DataType::Int64, false),
            Field::new("start_time", timestamp_type(), false),
            Field::new("user_id", DataType::Utf8, false),
            Field::new("level", DataType::Utf8, true),
            Field::new("song_id", DataType::Utf8, false),
            Field::new("artist_id", DataType::Utf8, false),
            Field::new("session_id", DataType::Int64, false),
            Field::new("location", DataType::Utf8, true),
            Field::new("user_agent", DataType::Utf8, true),
            Field::new("year", DataType::Int32, false),
            Field::new("month", DataType::Int32, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.songplay_id))),
                timestamps(rows.iter().map(|r| r.start_time)),
                utf8(rows.iter().map(|r| Some(&r.user_id))),
                utf8(rows.iter().map(|r| r.level.as_ref())),
                utf8(rows.iter().map(|r| Some(&r.song_id))),
                utf8(rows.iter().map(|r| Some(&r.artist_id))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.session_id))),
                utf8(rows.iter().map(|r| r.location.as_ref())),
                utf8(rows.iter().map(|r| r.user_agent.as_ref())),
                Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.year))),
                Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.month))),
            ],
        )
    }
}
