use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::csv::reader::{Format, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use strata_result::{Error, Result};
use strata_storage::ChunkBufferMap;
use strata_types::{ChunkKey, ChunkMetadataVector, FileRegion, VARLEN_DATA_SUB_KEY};

use crate::encoder::{arrow_schema, encode_column};
use crate::table::ForeignTableConfig;
use crate::wrapper::ForeignDataWrapper;

#[derive(Default, Serialize, Deserialize)]
struct CsvWrapperState {
    fragment_regions: BTreeMap<i32, FileRegion>,
    num_rows: usize,
    #[serde(skip)]
    is_restored: bool,
}

/// Data wrapper reading a delimited text file through the Arrow CSV reader.
///
/// Rows map to fragments positionally: fragment `i` covers rows
/// `[i * fragment_size, (i + 1) * fragment_size)`. The fragment map and row
/// count are the wrapper's recoverable state.
pub struct CsvDataWrapper {
    config: Arc<ForeignTableConfig>,
    state: Mutex<CsvWrapperState>,
}

impl CsvDataWrapper {
    pub fn new(config: Arc<ForeignTableConfig>) -> Self {
        Self {
            config,
            state: Mutex::new(CsvWrapperState::default()),
        }
    }

    fn delimiter(&self) -> u8 {
        self.config
            .options
            .get("DELIMITER")
            .and_then(|v| v.bytes().next())
            .unwrap_or(b',')
    }

    fn has_header(&self) -> bool {
        self.config
            .options
            .get("HEADER")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }

    /// Read the whole file into one record batch with the table's schema.
    fn scan_file(&self) -> Result<RecordBatch> {
        let path = self.config.resolved_file_path()?;
        let schema = Arc::new(arrow_schema(&self.config.columns));
        let mut format = Format::default().with_header(self.has_header());
        if self.delimiter() != b',' {
            format = format.with_delimiter(self.delimiter());
        }
        let reader = ReaderBuilder::new(Arc::clone(&schema))
            .with_format(format)
            .build(File::open(&path)?)?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(arrow::compute::concat_batches(&schema, batches.iter())?)
    }

    fn fragment_slice(&self, batch: &RecordBatch, fragment_id: i32) -> Result<RecordBatch> {
        let fragment_size = self.config.fragment_size();
        let start = fragment_id as usize * fragment_size;
        if start >= batch.num_rows() {
            return Err(Error::Internal(format!(
                "fragment {fragment_id} is out of range for table \"{}\"",
                self.config.name
            )));
        }
        let len = fragment_size.min(batch.num_rows() - start);
        Ok(batch.slice(start, len))
    }
}

impl ForeignDataWrapper for CsvDataWrapper {
    fn populate_chunk_metadata(&self, out: &mut ChunkMetadataVector) -> Result<()> {
        let batch = self.scan_file()?;
        let fragment_size = self.config.fragment_size();
        let num_rows = batch.num_rows();
        let num_fragments = num_rows.div_ceil(fragment_size);

        let mut regions = BTreeMap::new();
        for fragment_id in 0..num_fragments as i32 {
            let slice = self.fragment_slice(&batch, fragment_id)?;
            regions.insert(
                fragment_id,
                FileRegion {
                    first_row_index: fragment_id as usize * fragment_size,
                    row_count: slice.num_rows(),
                    ..FileRegion::default()
                },
            );
            for (idx, column) in self.config.columns.iter().enumerate() {
                let encoded = encode_column(column, slice.column(idx))?;
                let key = if column.sql_type.is_varlen() {
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
                };
                out.push((key, encoded.metadata));
            }
        }

        let mut state = self.state.lock().expect("csv wrapper state poisoned");
        state.fragment_regions = regions;
        state.num_rows = num_rows;
        tracing::debug!(
            table = %self.config.name,
            rows = num_rows,
            fragments = num_fragments,
            "scanned csv metadata"
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

        let batch = self.scan_file()?;
        let slice = self.fragment_slice(&batch, fragment_id)?;

        for (idx, column) in self.config.columns.iter().enumerate() {
            let data_key = if column.sql_type.is_varlen() {
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
            };
            let Some(buffer) = required.get(&data_key) else {
                continue;
            };
            let encoded = encode_column(column, slice.column(idx))?;
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
        let state = self.state.lock().expect("csv wrapper state poisoned");
        let file = File::create(path)?;
        serde_json::to_writer(file, &*state)
            .map_err(|e| Error::Internal(format!("failed to serialize csv wrapper state: {e}")))
    }

    fn restore_data_wrapper_internals(
        &self,
        path: &Path,
        _chunk_metadata: &ChunkMetadataVector,
    ) -> Result<()> {
        let file = File::open(path)?;
        let mut restored: CsvWrapperState = serde_json::from_reader(file)
            .map_err(|e| Error::Internal(format!("failed to restore csv wrapper state: {e}")))?;
        restored.is_restored = true;
        *self.state.lock().expect("csv wrapper state poisoned") = restored;
        Ok(())
    }

    fn is_restored(&self) -> bool {
        self.state
            .lock()
            .expect("csv wrapper state poisoned")
            .is_restored
    }
}
