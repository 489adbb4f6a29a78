use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use strata_result::{Error, Result};
use strata_storage::{ChunkBufferMap, ChunkBufferRef};
use strata_types::{ChunkKey, ChunkMetadataVector, VARLEN_DATA_SUB_KEY, VARLEN_INDEX_SUB_KEY};

use crate::buffer::ForeignStorageBuffer;
use crate::csv_wrapper::CsvDataWrapper;
use crate::parquet_wrapper::ParquetDataWrapper;
use crate::table::{DataWrapperType, ForeignTableConfig, TableRegistry};
use crate::wrapper::{ForeignDataWrapper, MockForeignDataWrapper};

/// The chunk keys of the column family the destination chunk belongs to:
/// the data chunk plus, for variable-length columns, its index sibling.
pub fn column_family_keys(config: &ForeignTableConfig, key: &ChunkKey) -> Result<Vec<ChunkKey>> {
    let column = config.column(key.column_id()).ok_or(Error::NotFound)?;
    let fragment_id = key.fragment_id();
    if column.sql_type.is_varlen() {
        Ok(vec![
            ChunkKey::varlen_chunk(
                config.db_id,
                config.table_id,
                column.column_id,
                fragment_id,
                VARLEN_DATA_SUB_KEY,
            ),
            ChunkKey::varlen_chunk(
                config.db_id,
                config.table_id,
                column.column_id,
                fragment_id,
                VARLEN_INDEX_SUB_KEY,
            ),
        ])
    } else {
        Ok(vec![ChunkKey::chunk(
            config.db_id,
            config.table_id,
            column.column_id,
            fragment_id,
        )])
    }
}

/// Serves foreign table chunks straight from the data wrappers, without any
/// caching. Sibling chunks produced as a by-product of a fetch are parked in
/// a temp buffer map and consumed by the next fetch for their key.
pub struct ForeignStorageMgr {
    registry: Arc<TableRegistry>,
    data_wrappers: RwLock<BTreeMap<ChunkKey, Arc<dyn ForeignDataWrapper>>>,
    temp_chunk_buffers: RwLock<BTreeMap<ChunkKey, ChunkBufferRef>>,
}

impl ForeignStorageMgr {
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self {
            registry,
            data_wrappers: RwLock::new(BTreeMap::new()),
            temp_chunk_buffers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Deliver exactly `num_bytes` of the chunk into `destination` (the
    /// whole chunk when zero). May allocate transient buffers for the rest
    /// of the chunk's column family.
    pub fn fetch_buffer(
        &self,
        chunk_key: &ChunkKey,
        destination: &ChunkBufferRef,
        num_bytes: usize,
    ) -> Result<()> {
        if self.fetch_buffer_if_temp_entry_exists(chunk_key, destination, num_bytes)? {
            return Ok(());
        }
        self.create_and_populate_data_wrapper_if_not_exists(chunk_key)?;

        let config = self.registry.get(&chunk_key.table_prefix())?;
        let mut family = column_family_keys(&config, chunk_key)?;
        family.retain(|k| k != chunk_key);

        let mut required = self.allocate_temp_buffers_for_chunks(&family);
        required.insert(chunk_key.clone(), Arc::clone(destination));
        // The wrapper writes straight into the destination buffer.
        self.get_data_wrapper(chunk_key)?
            .populate_chunk_buffers(&required, &ChunkBufferMap::new())?;
        Ok(())
    }

    fn fetch_buffer_if_temp_entry_exists(
        &self,
        chunk_key: &ChunkKey,
        destination: &ChunkBufferRef,
        num_bytes: usize,
    ) -> Result<bool> {
        let buffer = {
            let temp = self
                .temp_chunk_buffers
                .read()
                .expect("temp buffer map lock poisoned");
            match temp.get(chunk_key) {
                Some(buffer) => Arc::clone(buffer),
                None => return Ok(false),
            }
        };
        copy_buffer(&buffer, destination, num_bytes)?;
        let mut temp = self
            .temp_chunk_buffers
            .write()
            .expect("temp buffer map lock poisoned");
        temp.remove(chunk_key);
        Ok(true)
    }

    pub fn get_chunk_metadata_vec_for_key_prefix(
        &self,
        out: &mut ChunkMetadataVector,
        key_prefix: &ChunkKey,
    ) -> Result<()> {
        debug_assert!(key_prefix.is_table_key());
        self.create_data_wrapper_if_not_exists(key_prefix)?;
        self.get_data_wrapper(key_prefix)?.populate_chunk_metadata(out)
    }

    /// Drop the table's wrapper and any transient buffers scoped to it.
    pub fn remove_table_related_ds(&self, db_id: i32, table_id: i32) {
        let table_key = ChunkKey::table(db_id, table_id);
        {
            let mut wrappers = self
                .data_wrappers
                .write()
                .expect("data wrapper map lock poisoned");
            wrappers.remove(&table_key);
        }
        self.clear_temp_chunk_buffer_map_entries_for_table(&table_key);
    }

    pub fn has_data_wrapper_for_chunk(&self, chunk_key: &ChunkKey) -> bool {
        debug_assert!(chunk_key.has_table_prefix());
        let wrappers = self
            .data_wrappers
            .read()
            .expect("data wrapper map lock poisoned");
        wrappers.contains_key(&chunk_key.table_prefix())
    }

    pub fn get_data_wrapper(&self, chunk_key: &ChunkKey) -> Result<Arc<dyn ForeignDataWrapper>> {
        let wrappers = self
            .data_wrappers
            .read()
            .expect("data wrapper map lock poisoned");
        wrappers
            .get(&chunk_key.table_prefix())
            .cloned()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "no data wrapper registered for table {}",
                    chunk_key.table_prefix()
                ))
            })
    }

    /// Install a fault-injecting mock over the table's existing wrapper.
    pub fn set_data_wrapper(&self, table_key: &ChunkKey, mock: Arc<MockForeignDataWrapper>) {
        debug_assert!(table_key.is_table_key());
        let mut wrappers = self
            .data_wrappers
            .write()
            .expect("data wrapper map lock poisoned");
        let parent = wrappers
            .get(table_key)
            .cloned()
            .expect("cannot mock a table with no wrapper");
        mock.set_parent_wrapper(parent);
        wrappers.insert(table_key.clone(), mock);
    }

    /// Create the table's wrapper when absent. Returns true when a wrapper
    /// was created by this call.
    pub fn create_data_wrapper_if_not_exists(&self, chunk_key: &ChunkKey) -> Result<bool> {
        let table_key = chunk_key.table_prefix();
        let mut wrappers = self
            .data_wrappers
            .write()
            .expect("data wrapper map lock poisoned");
        if wrappers.contains_key(&table_key) {
            return Ok(false);
        }
        let config = self.registry.get(&table_key)?;
        let wrapper: Arc<dyn ForeignDataWrapper> = match config.server.wrapper_type {
            DataWrapperType::Csv => Arc::new(CsvDataWrapper::new(config)),
            DataWrapperType::Parquet => Arc::new(ParquetDataWrapper::new(config)),
        };
        wrappers.insert(table_key, wrapper);
        Ok(true)
    }

    /// No-op when caching is disabled.
    pub fn refresh_table(&self, _table_key: &ChunkKey, _evict_cached_entries: bool) -> Result<()> {
        Ok(())
    }

    pub fn clear_temp_chunk_buffer_map_entries_for_table(&self, table_key: &ChunkKey) {
        debug_assert!(table_key.is_table_key());
        let upper = table_key.upper_bound_of_prefix();
        let mut temp = self
            .temp_chunk_buffers
            .write()
            .expect("temp buffer map lock poisoned");
        let keys: Vec<ChunkKey> = temp
            .range(table_key.clone()..upper)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            temp.remove(&key);
        }
    }

    pub fn is_data_wrapper_restored(&self, chunk_key: &ChunkKey) -> bool {
        if !self.has_data_wrapper_for_chunk(chunk_key) {
            return false;
        }
        self.get_data_wrapper(chunk_key)
            .map(|w| w.is_restored())
            .unwrap_or(false)
    }

    fn create_and_populate_data_wrapper_if_not_exists(&self, chunk_key: &ChunkKey) -> Result<()> {
        let table_key = chunk_key.table_prefix();
        if self.create_data_wrapper_if_not_exists(&table_key)? {
            let mut chunk_metadata = ChunkMetadataVector::new();
            self.get_data_wrapper(&table_key)?
                .populate_chunk_metadata(&mut chunk_metadata)?;
        }
        Ok(())
    }

    fn allocate_temp_buffers_for_chunks(&self, chunk_keys: &[ChunkKey]) -> ChunkBufferMap {
        let mut map = ChunkBufferMap::new();
        let mut temp = self
            .temp_chunk_buffers
            .write()
            .expect("temp buffer map lock poisoned");
        for key in chunk_keys {
            let buffer: ChunkBufferRef = Arc::new(Mutex::new(ForeignStorageBuffer::new()));
            temp.insert(key.clone(), Arc::clone(&buffer));
            map.insert(key.clone(), buffer);
        }
        map
    }
}

/// Copy the first `num_bytes` of `src` into `dst` (all of it when zero),
/// along with the source metadata.
pub(crate) fn copy_buffer(
    src: &ChunkBufferRef,
    dst: &ChunkBufferRef,
    num_bytes: usize,
) -> Result<()> {
    let (bytes, metadata) = {
        let guard = src.lock().expect("chunk buffer lock poisoned");
        let len = if num_bytes == 0 {
            guard.size()
        } else {
            num_bytes.min(guard.size())
        };
        (guard.as_bytes()[..len].to_vec(), guard.metadata().cloned())
    };
    let mut guard = dst.lock().expect("chunk buffer lock poisoned");
    guard.reset_to_empty();
    guard.append(&bytes);
    if let Some(metadata) = metadata {
        guard.set_metadata(metadata);
    }
    Ok(())
}
