//! Splitting a batch into per-partition batches.

use std::collections::BTreeMap;

use deltalake::arrow::array::{Array, RecordBatch, UInt32Array};
use deltalake::arrow::compute::take_record_batch;
use deltalake::arrow::util::display::{ArrayFormatter, FormatOptions};
use object_store::path::Path;
use snafu::prelude::*;

use crate::error::{ArrowSnafu, MissingPartitionColumnSnafu, SinkError};
use sparkify_core::partition_dir;

/// Rows sharing one set of partition values, partition columns removed.
#[derive(Debug)]
pub struct PartitionGroup {
    /// Directory relative to the sink root, table name first.
    pub dir: Path,
    pub batch: RecordBatch,
}

/// Group rows of `batch` by the values of `columns`.
///
/// Groups come out sorted by partition values, and rows keep their relative
/// order inside a group. Without partition columns the whole batch is one
/// group under the table directory. An empty batch yields no groups.
pub fn split_by_partition(
    table: &'static str,
    batch: &RecordBatch,
    columns: &[&str],
) -> Result<Vec<PartitionGroup>, SinkError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }

    let schema = batch.schema();
    let partition_indices = columns
        .iter()
        .map(|column| {
            schema
                .index_of(column)
                .ok()
                .context(MissingPartitionColumnSnafu { table, column: *column })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !partition_indices.contains(i))
        .collect();
    let data = batch.project(&data_indices).context(ArrowSnafu { table })?;

    if columns.is_empty() {
        return Ok(vec![PartitionGroup {
            dir: Path::from(table),
            batch: data,
        }]);
    }

    let options = FormatOptions::default();
    let formatters = partition_indices
        .iter()
        .map(|&i| ArrayFormatter::try_new(batch.column(i).as_ref(), &options))
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu { table })?;

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let key = partition_indices
            .iter()
            .zip(&formatters)
            .map(|(&i, formatter)| {
                (!batch.column(i).is_null(row)).then(|| formatter.value(row).to_string())
            })
            .collect();
        groups.entry(key).or_default().push(row as u32);
    }

    groups
        .into_iter()
        .map(|(values, rows)| {
            let indices = UInt32Array::from(rows);
            let batch = take_record_batch(&data, &indices).context(ArrowSnafu { table })?;
            let pairs = columns
                .iter()
                .copied()
                .zip(values.iter().map(|v| v.as_deref()));
            Ok(PartitionGroup {
                dir: partition_dir(table, pairs),
                batch,
            })
        })
        .collect()
}
