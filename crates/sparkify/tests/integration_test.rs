//! Integration tests for sparkify

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike};
use deltalake::arrow::array::{Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use deltalake::arrow::util::display::{ArrayFormatter, FormatOptions};
use deltalake::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

const SONGS: &[(&str, &str)] = &[
    (
        "song_data/A/A/A/TRAAAAK128F9318786.json",
        r#"{"num_songs": 1, "artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58252, "year": 0}"#,
    ),
    (
        "song_data/A/A/A/TRAAAEF128F4273421.json",
        r#"{"num_songs": 1, "artist_id": "ARJIE2Y1187B994AB7", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Line Renaud", "song_id": "SOUPIRU12A6D4FA1E1", "title": "Der Kleine Dompfaff", "duration": 152.92036, "year": 0}"#,
    ),
    (
        "song_data/A/A/B/TRAABCL128F4286650.json",
        r#"{"num_songs": 1, "artist_id": "ARMJAGH1187FB546F3", "artist_latitude": 35.14968, "artist_longitude": -90.04892, "artist_location": "Memphis, TN", "artist_name": "The Box Tops", "song_id": "SOCIWDW12A8C13D406", "title": "Soul Deep", "duration": 148.03546, "year": 1969}"#,
    ),
    (
        "song_data/A/B/C/TRABCEI128F424C983.json",
        r#"{"num_songs": 1, "artist_id": "ARMJAGH1187FB546F3", "artist_latitude": null, "artist_longitude": null, "artist_location": "Memphis", "artist_name": "The Box Tops", "song_id": "SOBOXTOP12A8C13D407", "title": "The Letter", "duration": 117.47873, "year": 1967}"#,
    ),
];

const LOG_NOV_15: &str = r#"{"artist":null,"auth":"Logged Out","firstName":null,"gender":null,"itemInSession":0,"lastName":null,"length":null,"level":"free","location":null,"method":"GET","page":"Home","registration":null,"sessionId":52,"song":null,"status":200,"ts":1542242481796,"userAgent":null,"userId":""}
{"artist":"Elena","auth":"Logged In","firstName":"Lily","gender":"F","itemInSession":5,"lastName":"Koch","length":269.58252,"level":"paid","location":"Chicago-Naperville-Elgin, IL-IN-WI","method":"PUT","page":"NextSong","registration":1541048010796.0,"sessionId":818,"song":"Setanta matins","status":200,"ts":1542242826796,"userAgent":"Mozilla/5.0 (X11; Linux x86_64)","userId":"15"}
{"artist":"The Box Tops","auth":"Logged In","firstName":"Lily","gender":"F","itemInSession":6,"lastName":"Koch","length":148.03546,"level":"paid","location":"Chicago-Naperville-Elgin, IL-IN-WI","method":"PUT","page":"NextSong","registration":1541048010796.0,"sessionId":818,"song":"Soul Deep","status":200,"ts":1542242900000,"userAgent":"Mozilla/5.0 (X11; Linux x86_64)","userId":"15"}
{"artist":"Unknown Band","auth":"Logged In","firstName":"Ryan","gender":"M","itemInSession":0,"lastName":"Smith","length":200.0,"level":"free","location":"San Jose-Sunnyvale-Santa Clara, CA","method":"PUT","page":"NextSong","registration":1541016707796.0,"sessionId":583,"song":"Nope","status":200,"ts":1542243000000,"userAgent":"Mozilla/5.0 (X11; Linux x86_64)","userId":"26"}
{"artist":"Elena","auth":"Logged In","firstName":"Ryan","gender":"M","itemInSession":1,"lastName":"Smith","length":269.582521,"level":"free","location":"San Jose-Sunnyvale-Santa Clara, CA","method":"PUT","page":"NextSong","registration":1541016707796.0,"sessionId":583,"song":"Setanta matins","status":200,"ts":1542243100000,"userAgent":"Mozilla/5.0 (X11; Linux x86_64)","userId":"26"}
{"artist":null,"auth":"Logged In","firstName":"Ryan","gender":"M","itemInSession":2,"lastName":"Smith","length":null,"level":"free","location":"San Jose-Sunnyvale-Santa Clara, CA","method":"GET","page":"Settings","registration":1541016707796.0,"sessionId":583,"song":null,"status":200,"ts":1542243200000,"userAgent":"Mozilla/5.0 (X11; Linux x86_64)","userId":"26"}
"#;

const LOG_DEC_01: &str = r#"{"artist":"Line Renaud","auth":"Logged In","firstName":"Tegan","gender":"F","itemInSession":3,"lastName":"Levine","length":152.92036,"level":"paid","location":"Portland-South Portland, ME","method":"PUT","page":"NextSong","registration":1540794356796.0,"sessionId":1065,"song":"Der Kleine Dompfaff","status":200,"ts":1543622400000,"userAgent":"Mozilla/5.0 (Macintosh)","userId":80}
"#;

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn seed_input(root: &Path) {
    for (path, json) in SONGS {
        write_file(root, path, &format!("{json}\n"));
    }
    write_file(root, "log_data/2018/11/2018-11-15-events.json", LOG_NOV_15);
    write_file(root, "log_data/2018/12/2018-12-01-events.json", LOG_DEC_01);
}

fn config_yaml(input: &Path, output: &Path) -> String {
    format!(
        r#"
source:
  root: "{}"
  max_concurrent_files: 2
sink:
  root: "{}"
  file_size_mb: 1
"#,
        input.display(),
        output.display()
    )
}

fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !dir.exists() {
        return files;
    }
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(parquet_files(&path));
        } else if path.extension().is_some_and(|e| e == "parquet") {
            files.push(path);
        }
    }
    files.sort();
    files
}

fn read_parquet(path: &Path) -> Vec<RecordBatch> {
    ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap()
        .map(|batch| batch.unwrap())
        .collect()
}

/// Partition `key=value` directories between the table dir and the file.
fn partition_values(table_dir: &Path, file: &Path) -> BTreeMap<String, String> {
    let relative = file.strip_prefix(table_dir).unwrap().to_str().unwrap();
    let object_path = object_store::path::Path::from(relative);
    sparkify_core::parse_partition_values(&object_path)
        .into_iter()
        .collect()
}

/// Every row of a table as `col=value|col=value`, plus partition values.
fn table_rows(table_dir: &Path) -> BTreeSet<String> {
    let options = FormatOptions::default().with_null("null");
    let mut rows = BTreeSet::new();
    for file in parquet_files(table_dir) {
        let partitions = partition_values(table_dir, &file);
        for batch in read_parquet(&file) {
            let schema = batch.schema();
            let formatters: Vec<ArrayFormatter> = batch
                .columns()
                .iter()
                .map(|c| ArrayFormatter::try_new(c.as_ref(), &options).unwrap())
                .collect();
            for row in 0..batch.num_rows() {
                let mut cells: Vec<String> = schema
                    .fields()
                    .iter()
                    .zip(&formatters)
                    .filter(|(f, _)| f.name() != "songplay_id")
                    .map(|(f, fmt)| format!("{}={}", f.name(), fmt.value(row)))
                    .collect();
                cells.extend(partitions.iter().map(|(k, v)| format!("{k}={v}")));
                rows.insert(cells.join("|"));
            }
        }
    }
    rows
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
}

mod pipeline_tests {
    use super::*;
    use sparkify::{Config, Pipeline, PipelineError, SourceError};

    async fn run(input: &Path, output: &Path) -> sparkify::PipelineStats {
        let config = Config::parse_with(&config_yaml(input, output), |_| None).unwrap();
        let pipeline = Pipeline::from_config(&config).await.unwrap();
        pipeline.run().await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_row_counts() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());

        let stats = run(input.path(), output.path()).await;

        assert_eq!(stats.song_records, 4);
        assert_eq!(stats.songplay_song_records, 4);
        assert_eq!(stats.log_records, 7);
        assert_eq!(stats.next_song_events, 5);
        assert_eq!(stats.rows("songs"), 4);
        assert_eq!(stats.rows("artists"), 3);
        assert_eq!(stats.rows("users"), 3);
        assert_eq!(stats.rows("time"), 5);
        assert_eq!(stats.rows("songplays"), 3);
        assert_eq!(stats.unmatched_events, 2);

        for table in ["songs", "artists", "users", "time", "songplays"] {
            assert!(
                output.path().join(table).join("_SUCCESS").exists(),
                "missing marker for {table}"
            );
        }
    }

    #[tokio::test]
    async fn test_songs_partition_paths_match_rows() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        run(input.path(), output.path()).await;

        let expected: BTreeMap<&str, (&str, &str)> = [
            ("SOZCTXZ12AB0182364", ("0", "AR5KOSW1187FB35FF4")),
            ("SOUPIRU12A6D4FA1E1", ("0", "ARJIE2Y1187B994AB7")),
            ("SOCIWDW12A8C13D406", ("1969", "ARMJAGH1187FB546F3")),
            ("SOBOXTOP12A8C13D407", ("1967", "ARMJAGH1187FB546F3")),
        ]
        .into_iter()
        .collect();

        let table_dir = output.path().join("songs");
        let mut seen = 0;
        for file in parquet_files(&table_dir) {
            let partitions = partition_values(&table_dir, &file);
            for batch in read_parquet(&file) {
                assert!(batch.column_by_name("year").is_none());
                assert!(batch.column_by_name("artist_id").is_none());
                let ids = string_column(&batch, "song_id");
                for i in 0..ids.len() {
                    let (year, artist_id) = expected[ids.value(i)];
                    assert_eq!(partitions["year"], year);
                    assert_eq!(partitions["artist_id"], artist_id);
                    seen += 1;
                }
            }
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn test_songplay_and_time_partitions_match_start_time() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        run(input.path(), output.path()).await;

        for table in ["songplays", "time"] {
            let table_dir = output.path().join(table);
            let mut months = BTreeSet::new();
            for file in parquet_files(&table_dir) {
                let partitions = partition_values(&table_dir, &file);
                for batch in read_parquet(&file) {
                    let start = batch
                        .column_by_name("start_time")
                        .unwrap()
                        .as_any()
                        .downcast_ref::<TimestampMicrosecondArray>()
                        .unwrap();
                    for i in 0..start.len() {
                        let t = DateTime::from_timestamp_micros(start.value(i)).unwrap();
                        assert_eq!(partitions["year"], t.year().to_string());
                        assert_eq!(partitions["month"], t.month().to_string());
                        months.insert(t.month());
                    }
                }
            }
            assert_eq!(months, BTreeSet::from([11, 12]), "{table}");
        }
    }

    #[tokio::test]
    async fn test_exact_float_join_output() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        run(input.path(), output.path()).await;

        let rows = table_rows(&output.path().join("songplays"));
        let elena: Vec<&String> = rows.iter().filter(|r| r.contains("SOZCTXZ12AB0182364")).collect();

        // User 26 played the same title with length 269.582521 and gets no row.
        assert_eq!(elena.len(), 1);
        assert!(elena[0].contains("artist_id=AR5KOSW1187FB35FF4"));
        assert!(elena[0].contains("user_id=15"));
        assert!(elena[0].contains("session_id=818"));
        assert!(elena[0].contains("start_time=2018-11-15T00:47:06"));
        assert!(rows.iter().all(|r| !r.contains("user_id=26")));
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_dimensions() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());

        run(input.path(), output.path()).await;
        let first: Vec<(BTreeSet<String>, usize)> = ["songs", "artists", "users", "time", "songplays"]
            .iter()
            .map(|t| {
                let dir = output.path().join(t);
                (table_rows(&dir), parquet_files(&dir).len())
            })
            .collect();

        let stats = run(input.path(), output.path()).await;
        let second: Vec<(BTreeSet<String>, usize)> = ["songs", "artists", "users", "time", "songplays"]
            .iter()
            .map(|t| {
                let dir = output.path().join(t);
                (table_rows(&dir), parquet_files(&dir).len())
            })
            .collect();

        assert_eq!(first, second);
        assert!(stats.tables.values().all(|s| s.stale_removed == s.files));
    }

    #[tokio::test]
    async fn test_artist_dedup_keeps_first_in_scan_order() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        run(input.path(), output.path()).await;

        let rows = table_rows(&output.path().join("artists"));
        let box_tops: Vec<&String> = rows.iter().filter(|r| r.contains("ARMJAGH1187FB546F3")).collect();
        assert_eq!(box_tops.len(), 1);
        assert!(box_tops[0].contains("location=Memphis, TN"));

        let renaud: Vec<&String> = rows.iter().filter(|r| r.contains("ARJIE2Y1187B994AB7")).collect();
        assert!(renaud[0].contains("latitude=null"));
    }

    #[tokio::test]
    async fn test_run_reports_metrics() {
        sparkify::init_metrics_test();
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        run(input.path(), output.path()).await;

        let rendered = sparkify_core::MetricsController::get().unwrap().render();
        assert!(rendered.contains("sparkify_songplay_events_unmatched_total"));
        assert!(rendered.contains("sparkify_rows_written_total{table=\"songplays\"}"));
        assert!(rendered.contains("sparkify_records_read_total{dataset=\"log_data\"}"));
    }

    #[tokio::test]
    async fn test_missing_log_data_aborts_before_phase_b_writes() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for (path, json) in SONGS {
            write_file(input.path(), path, json);
        }

        let config = Config::parse_with(&config_yaml(input.path(), output.path()), |_| None).unwrap();
        let pipeline = Pipeline::from_config(&config).await.unwrap();
        let err = pipeline.run().await.unwrap_err();

        match err {
            PipelineError::Source { source } => assert!(source.is_unavailable(), "{source}"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(output.path().join("songs/_SUCCESS").exists());
        assert!(!output.path().join("users").exists());
        assert!(!output.path().join("time").exists());
    }

    #[tokio::test]
    async fn test_malformed_log_line_aborts_unless_skipped() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        seed_input(input.path());
        write_file(
            input.path(),
            "log_data/2018/11/2018-11-16-events.json",
            "{\"page\":\"NextSong\",\n",
        );

        let yaml = config_yaml(input.path(), output.path());
        let config = Config::parse_with(&yaml, |_| None).unwrap();
        let err = Pipeline::from_config(&config)
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Source {
                source: SourceError::RecordParse { line: 1, .. }
            }
        ));

        let yaml = yaml.replace(
            "  max_concurrent_files: 2",
            "  max_concurrent_files: 2\n  skip_malformed_records: true",
        );
        let config = Config::parse_with(&yaml, |_| None).unwrap();
        let stats = Pipeline::from_config(&config)
            .await
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(stats.rows("songplays"), 3);
    }
}

mod sink_contract_tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use sparkify::error::{SinkError, StorageError};
    use sparkify::{
        PartitionedSink, Pipeline, PipelineError, StorageRecordSource, WriteMode, WriteSummary,
    };

    use super::*;

    /// Records what the pipeline hands to the sink.
    #[derive(Default)]
    struct MemorySink {
        writes: Mutex<Vec<(String, usize, Vec<String>)>>,
        fail_on: Option<&'static str>,
        /// Table whose write takes a while to finish.
        slow_on: Option<&'static str>,
    }

    #[async_trait]
    impl PartitionedSink for MemorySink {
        async fn write(
            &self,
            table: &'static str,
            batch: RecordBatch,
            partition_columns: &[&str],
            mode: WriteMode,
        ) -> Result<WriteSummary, SinkError> {
            assert_eq!(mode, WriteMode::Overwrite);
            if self.slow_on == Some(table) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.fail_on == Some(table) {
                return Err(SinkError::WriteFailure {
                    table,
                    source: StorageError::InvalidUrl {
                        url: "memory://denied".to_string(),
                    },
                });
            }
            self.writes.lock().unwrap().push((
                table.to_string(),
                batch.num_rows(),
                partition_columns.iter().map(|c| c.to_string()).collect(),
            ));
            Ok(WriteSummary {
                rows: batch.num_rows(),
                ..Default::default()
            })
        }
    }

    async fn source(input: &TempDir) -> StorageRecordSource {
        StorageRecordSource::new(input.path().to_str().unwrap(), Default::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tables_and_partition_columns_handed_to_sink() {
        let input = TempDir::new().unwrap();
        seed_input(input.path());

        let pipeline = Pipeline::new(source(&input).await, MemorySink::default());
        pipeline.run().await.unwrap();

        let mut writes = pipeline.sink().writes.lock().unwrap().clone();
        writes.sort();
        let expected = vec![
            ("artists".to_string(), 3, vec![]),
            ("songplays".to_string(), 3, vec!["year".to_string(), "month".to_string()]),
            ("songs".to_string(), 4, vec!["year".to_string(), "artist_id".to_string()]),
            ("time".to_string(), 5, vec!["year".to_string(), "month".to_string()]),
            ("users".to_string(), 3, vec![]),
        ];
        assert_eq!(writes, expected);
    }

    #[tokio::test]
    async fn test_write_failure_stops_later_phases() {
        let input = TempDir::new().unwrap();
        seed_input(input.path());

        let sink = MemorySink {
            fail_on: Some("users"),
            ..Default::default()
        };
        let pipeline = Pipeline::new(source(&input).await, sink);
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Sink {
                source: SinkError::WriteFailure { table: "users", .. }
            }
        ));

        let tables: Vec<String> = pipeline
            .sink()
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _, _)| t.clone())
            .collect();
        assert!(!tables.contains(&"songplays".to_string()));
    }

    #[tokio::test]
    async fn test_failed_write_lets_sibling_finish() {
        let input = TempDir::new().unwrap();
        seed_input(input.path());

        let sink = MemorySink {
            fail_on: Some("artists"),
            slow_on: Some("songs"),
            ..Default::default()
        };
        let pipeline = Pipeline::new(source(&input).await, sink);
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Sink {
                source: SinkError::WriteFailure { table: "artists", .. }
            }
        ));

        // The songs write outlived the artists failure and still completed.
        let writes = pipeline.sink().writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "songs");
        assert_eq!(writes[0].1, 4);
    }

    #[tokio::test]
    async fn test_songplay_pattern_can_differ_from_song_pattern() {
        let input = TempDir::new().unwrap();
        seed_input(input.path());

        let patterns = sparkify::DatasetPatterns {
            song_data: "song_data/A/A/A/*.json".to_string(),
            ..Default::default()
        };
        let pipeline = Pipeline::new(source(&input).await, MemorySink::default()).with_patterns(patterns);
        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.song_records, 2);
        assert_eq!(stats.songplay_song_records, 4);
        assert_eq!(stats.rows("songs"), 2);
        assert_eq!(stats.rows("songplays"), 3);
    }
}

mod config_tests {
    use sparkify::Config;
    use sparkify::config::ParquetCompression;

    #[test]
    fn test_full_config_yaml_parsing() {
        let yaml = r#"
source:
  root: "s3a://udacity-dend/"
  song_data: "song_data/A/B/C/*.json"
  log_data: "log_data/2018/11/*.json"
  max_concurrent_files: 32
  skip_malformed_records: true
  storage_options:
    aws_region: us-west-2

sink:
  root: "gs://sparkify-lake/star"
  file_size_mb: 64
  compression: gzip
  storage_options:
    google_service_account: /secrets/sa.json

metrics:
  address: "0.0.0.0:9090"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.song_data, "song_data/A/B/C/*.json");
        assert_eq!(config.songplay_song_data(), "song_data/A/B/C/*.json");
        assert_eq!(config.source.max_concurrent_files, 32);
        assert!(config.source.skip_malformed_records);
        assert_eq!(config.sink.file_size_mb, 64);
        assert_eq!(config.sink.compression, ParquetCompression::Gzip);
        assert_eq!(config.metrics.address.as_deref(), Some("0.0.0.0:9090"));

        let writer = config.sink.writer_config();
        assert_eq!(writer.target_file_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_compression_rejected() {
        let yaml = r#"
source:
  root: "/in"
sink:
  root: "/out"
  compression: brotli
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
