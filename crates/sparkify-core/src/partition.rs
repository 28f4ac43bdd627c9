//! Hive-style partition paths (`year=2018/month=11/part-….parquet`).
//!
//! Values are placed verbatim into one path segment each; `object_store`
//! percent-encodes any character that is not legal inside a segment, so a
//! `/` inside a value can never introduce an extra directory level. `=` is
//! kept as is: column names never contain it, so splitting a segment on its
//! first `=` recovers the value intact.

use object_store::path::{Path, PathPart};

/// Directory name used for null or empty partition values.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// Build the relative directory for one partition.
///
/// `pairs` are `(column, value)` in partition-column order; `None` and empty
/// values map to [`NULL_PARTITION_VALUE`].
pub fn partition_dir<'a, I>(table: &str, pairs: I) -> Path
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let segments = pairs.into_iter().map(|(column, value)| {
        let value = value
            .filter(|v| !v.is_empty())
            .unwrap_or(NULL_PARTITION_VALUE);
        PathPart::from(format!("{column}={value}"))
    });

    std::iter::once(PathPart::from(table.to_string()))
        .chain(segments)
        .collect()
}

/// Extract every `key=value` segment from a relative object path, in order.
///
/// The final segment is the file name and is never treated as a partition.
pub fn parse_partition_values(path: &Path) -> Vec<(String, String)> {
    let parts: Vec<PathPart<'_>> = path.parts().collect();
    let Some((_file, dirs)) = parts.split_last() else {
        return Vec::new();
    };

    dirs.iter()
        .filter_map(|part| {
            let segment = part.as_ref();
            segment
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_dir_orders_columns() {
        let dir = partition_dir("time", [("year", Some("2018")), ("month", Some("11"))]);
        assert_eq!(dir.as_ref(), "time/year=2018/month=11");
    }

    #[test]
    fn test_partition_dir_null_and_empty() {
        let dir = partition_dir("songs", [("year", None), ("artist_id", Some(""))]);
        assert_eq!(
            dir.as_ref(),
            "songs/year=__HIVE_DEFAULT_PARTITION__/artist_id=__HIVE_DEFAULT_PARTITION__"
        );
    }

    #[test]
    fn test_partition_dir_slash_stays_in_one_segment() {
        let dir = partition_dir("songs", [("artist_id", Some("AC/DC"))]);
        assert_eq!(dir.parts().count(), 2);
    }

    #[test]
    fn test_equals_in_value_round_trips() {
        let dir = partition_dir("songs", [("artist_id", Some("AR=42")), ("year", Some("2004"))]);
        assert_eq!(dir.as_ref(), "songs/artist_id=AR=42/year=2004");

        let file = dir.child("part-00000.parquet");
        assert_eq!(
            parse_partition_values(&file),
            vec![
                ("artist_id".to_string(), "AR=42".to_string()),
                ("year".to_string(), "2004".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_partition_values() {
        let path = Path::from("songplays/year=2018/month=11/part-00000-x.snappy.parquet");
        assert_eq!(
            parse_partition_values(&path),
            vec![
                ("year".to_string(), "2018".to_string()),
                ("month".to_string(), "11".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_file_name_and_plain_dirs() {
        let path = Path::from("users/a=b.parquet");
        assert!(parse_partition_values(&path).is_empty());
        let path = Path::from("artists/part-0.parquet");
        assert!(parse_partition_values(&path).is_empty());
    }
}
