use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::{Deserialize, Serialize};
use strata_result::{Error, Result};
use strata_storage::ChunkBufferMap;
use strata_types::{ChunkKey, ChunkMetadataVector, RowGroupInterval, VARLEN_DATA_SUB_KEY};

use crate::encoder::{arrow_data_type, encode_column};
use crate::table::ForeignTableConfig;
use crate::wrapper::ForeignDataWrapper;

#[derive(Default, Serialize, Deserialize)]
struct ParquetWrapperState {
    fragment_intervals: BTreeMap<i32, RowGroupInterval>,
    num_rows: usize,
    #[serde(skip)]
    is_restored: bool,
}

/// Data wrapper reading a Parquet file row-group-wise.
///
/// Consecutive row groups accumulate into a fragment until the fragment-size
/// row budget is reached; the per-fragment [`RowGroupInterval`]s are the
/// wrapper's recoverable state.
pub struct ParquetDataWrapper {
    config: Arc<ForeignTableConfig>,
    state: Mutex<ParquetWrapperState>,
}

impl ParquetDataWrapper {
    pub fn new(config: Arc<ForeignTableConfig>) -> Self {
        Self {
            config,
            state: Mutex::new(ParquetWrapperState::default()),
        }
    }

    fn row_group_sizes(&self, path: &str) -> Result<Vec<usize>> {
        let reader = SerializedFileReader::new(File::open(path)?)?;
        Ok(reader
            .metadata()
            .row_groups()
            .iter()
            .map(|rg| rg.num_rows() as usize)
            .collect())
    }

    /// Assign row groups to fragments, accumulating until the fragment-size
    /// budget is met.
    fn build_fragment_intervals(
        &self,
        path: &str,
        group_sizes: &[usize],
    ) -> BTreeMap<i32, RowGroupInterval> {
        let fragment_size = self.config.fragment_size();
        let mut intervals = BTreeMap::new();
        let mut fragment_id = 0;
        let mut start = 0;
        let mut rows_in_fragment = 0;
        for (index, rows) in group_sizes.iter().enumerate() {
            rows_in_fragment += rows;
            if rows_in_fragment >= fragment_size || index + 1 == group_sizes.len() {
                intervals.insert(
                    fragment_id,
                    RowGroupInterval {
                        file_path: path.to_string(),
                        start_index: start,
                        end_index: index,
                    },
                );
                fragment_id += 1;
                start = index + 1;
                rows_in_fragment = 0;
            }
        }
        intervals
    }

    /// Read the row groups of one interval into a single batch, casting
    /// columns to the table's declared types.
    fn read_interval(&self, interval: &RowGroupInterval) -> Result<RecordBatch> {
        let file = File::open(&interval.file_path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let reader = builder
            .with_row_groups((interval.start_index..=interval.end_index).collect())
            .build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| Error::Internal("empty parquet row group interval".to_string()))?;
        Ok(arrow::compute::concat_batches(&schema, batches.iter())?)
    }

    fn column_array(
        &self,
        batch: &RecordBatch,
        column: &crate::table::ColumnSchema,
    ) -> Result<arrow::array::ArrayRef> {
        let idx = batch.schema().index_of(&column.name)?;
        let array = batch.column(idx);
        let target = arrow_data_type(column.sql_type);
        if array.data_type() == &target {
            Ok(Arc::clone(array))
        } else {
            Ok(arrow::compute::cast(array, &target)?)
        }
    }

    fn data_key(&self, column: &crate::table::ColumnSchema, fragment_id: i32) -> ChunkKey {
        if column.sql_type.is_varlen() {
            ChunkKey::varlen_chunk(
                self.config.db_id,
                self.config.table_id,
                column.column_id,
                fragment_id,
                VARLEN_DATA_SUB_KEY,
            )
        } else {
            ChunkKey::chunk(
                self.config.db_id,
                self.config.table_id,
                column.column_id,
                fragment_id,
            )
        }
    }
}

impl ForeignDataWrapper for ParquetDataWrapper {
    fn populate_chunk_metadata(&self, out: &mut ChunkMetadataVector) -> Result<()> {
        let path = self.config.resolved_file_path()?;
        let group_sizes = self.row_group_sizes(&path)?;
        let num_rows: usize = group_sizes.iter().sum();
        let intervals = self.build_fragment_intervals(&path, &group_sizes);

        for (fragment_id, interval) in &intervals {
            let batch = self.read_interval(interval)?;
            for column in &self.config.columns {
                let array = self.column_array(&batch, column)?;
                let encoded = encode_column(column, &array)?;
                out.push((self.data_key(column, *fragment_id), encoded.metadata));
            }
        }

        let mut state = self.state.lock().expect("parquet wrapper state poisoned");
        state.fragment_intervals = intervals;
        state.num_rows = num_rows;
        tracing::debug!(
            table = %self.config.name,
            rows = num_rows,
            row_groups = group_sizes.len(),
            "scanned parquet metadata"
        );
        Ok(())
    }

    fn populate_chunk_buffers(
        &self,
        required: &ChunkBufferMap,
        _optional: &ChunkBufferMap,
    ) -> Result<()> {
        let Some(first_key) = required.keys().next() else {
            return Ok(());
        };
        let fragment_id = first_key.fragment_id();
        debug_assert!(required.keys().all(|k| k.fragment_id() == fragment_id));

        let interval = {
            let state = self.state.lock().expect("parquet wrapper state poisoned");
            state.fragment_intervals.get(&fragment_id).cloned()
        }
        .ok_or_else(|| {
            Error::Internal(format!(
                "fragment {fragment_id} is unknown to the parquet wrapper for table \"{}\"",
                self.config.name
            ))
        })?;
        let batch = self.read_interval(&interval)?;

        for column in &self.config.columns {
            let data_key = self.data_key(column, fragment_id);
            let Some(buffer) = required.get(&data_key) else {
                continue;
            };
            let array = self.column_array(&batch, column)?;
            let encoded = encode_column(column, &array)?;
            {
                let mut guard = buffer.lock().expect("chunk buffer lock poisoned");
                guard.reset_to_empty();
                guard.append(&encoded.data);
                guard.set_metadata(encoded.metadata);
                guard.set_updated();
            }
            if let Some(index_bytes) = encoded.index {
                let index_key = data_key.index_sibling();
                let index_buffer = required.get(&index_key).ok_or_else(|| {
                    Error::Internal(format!(
                        "variable-length chunk {data_key} fetched without its index sibling"
                    ))
                })?;
                let mut guard = index_buffer.lock().expect("chunk buffer lock poisoned");
                guard.reset_to_empty();
                guard.append(&index_bytes);
                guard.set_updated();
            }
        }
        Ok(())
    }

    fn serialize_data_wrapper_internals(&self, path: &Path) -> Result<()> {
        let state = self.state.lock().expect("parquet wrapper state poisoned");
        let file = File::create(path)?;
        serde_json::to_writer(file, &*state).map_err(|e| {
            Error::Internal(format!("failed to serialize parquet wrapper state: {e}"))
        })
    }

    fn restore_data_wrapper_internals(
        &self,
        path: &Path,
        _chunk_metadata: &ChunkMetadataVector,
    ) -> Result<()> {
        let file = File::open(path)?;
        let mut restored: ParquetWrapperState = serde_json::from_reader(file).map_err(|e| {
            Error::Internal(format!("failed to restore parquet wrapper state: {e}"))
        })?;
        restored.is_restored = true;
        *self.state.lock().expect("parquet wrapper state poisoned") = restored;
        Ok(())
    }

    fn is_restored(&self) -> bool {
        self.state
            .lock()
            .expect("parquet wrapper state poisoned")
            .is_restored
    }
}
