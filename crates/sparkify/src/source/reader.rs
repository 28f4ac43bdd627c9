//! Newline-delimited JSON decoding into typed records.
//!
//! Each non-blank line is decoded on its own with `serde_json`. Syntax errors
//! are malformed records: they abort the read unless skipping is enabled.
//! Data errors (missing required field, wrong type) are shape errors and
//! always abort.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::error::{RecordParseSnafu, RecordShapeSnafu, SourceError};
use sparkify_core::emit;
use sparkify_core::metrics::events::{MalformedRecordSkipped, RecordsRead, SourceFileRead};

/// Decodes one file's worth of NDJSON into records of a single type.
#[derive(Debug, Clone)]
pub struct NdjsonReader {
    /// Log and skip malformed lines instead of failing.
    skip_malformed: bool,
    /// Dataset label for metrics.
    dataset: String,
}

impl NdjsonReader {
    pub fn new(dataset: impl Into<String>, skip_malformed: bool) -> Self {
        Self {
            skip_malformed,
            dataset: dataset.into(),
        }
    }

    /// Decode every record in `data`, in line order.
    pub fn read<T: DeserializeOwned>(&self, data: &Bytes, path: &str) -> Result<Vec<T>, SourceError> {
        let numbered = self.read_numbered(data, path)?;
        Ok(numbered.into_iter().map(|(_, record)| record).collect())
    }

    /// Like [`read`](Self::read), pairing each record with its 1-based line.
    pub fn read_numbered<T: DeserializeOwned>(
        &self,
        data: &Bytes,
        path: &str,
    ) -> Result<Vec<(usize, T)>, SourceError> {
        emit!(SourceFileRead {
            bytes: data.len() as u64,
            dataset: self.dataset.clone(),
        });

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (index, line) in data.as_ref().split(|b| *b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            let line_number = index + 1;

            match serde_json::from_slice::<T>(line) {
                Ok(record) => records.push((line_number, record)),
                Err(e) if e.classify() == Category::Data => {
                    return RecordShapeSnafu {
                        location: format!("{path}:{line_number}"),
                        message: e.to_string(),
                    }
                    .fail();
                }
                Err(e) if self.skip_malformed => {
                    warn!(path, line = line_number, error = %e, "Skipping malformed record");
                    emit!(MalformedRecordSkipped {
                        dataset: self.dataset.clone(),
                    });
                    skipped += 1;
                }
                Err(e) => {
                    return Err(e).context(RecordParseSnafu {
                        path: path.to_string(),
                        line: line_number,
                    });
                }
            }
        }

        emit!(RecordsRead {
            count: records.len() as u64,
            dataset: self.dataset.clone(),
        });
        debug!(path, records = records.len(), skipped, "Decoded source file");

        Ok(records)
    }
}
