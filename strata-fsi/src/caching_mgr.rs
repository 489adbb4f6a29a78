use std::sync::Arc;
use std::time::Instant;

use strata_result::{Error, Result};
use strata_storage::{ChunkBufferMap, ChunkBufferRef};
use strata_types::{ChunkKey, ChunkMetadataVector};

use crate::cache::ForeignStorageCache;
use crate::mgr::{column_family_keys, copy_buffer, ForeignStorageMgr};
use crate::table::TableRegistry;

/// Name of the wrapper recovery file written into each table's cache
/// directory.
pub const WRAPPER_METADATA_FILE_NAME: &str = "wrapper_metadata.json";

/// Wall-clock budget for re-populating chunks during a refresh.
const MAX_REFRESH_TIME_IN_SECONDS: u64 = 60 * 60;

/// Foreign storage manager that routes fetches and metadata scans through
/// the disk cache, and re-populates the cache on refresh.
pub struct CachingForeignStorageMgr {
    inner: ForeignStorageMgr,
    disk_cache: Arc<ForeignStorageCache>,
}

impl CachingForeignStorageMgr {
    pub fn new(registry: Arc<TableRegistry>, disk_cache: Arc<ForeignStorageCache>) -> Self {
        Self {
            inner: ForeignStorageMgr::new(registry),
            disk_cache,
        }
    }

    pub fn disk_cache(&self) -> &Arc<ForeignStorageCache> {
        &self.disk_cache
    }

    pub fn inner(&self) -> &ForeignStorageMgr {
        &self.inner
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        self.inner.registry()
    }

    /// Fetch a chunk through the cache: populate the whole column family
    /// into cache-owned buffers, register them, then copy the requested
    /// slice out to the caller's buffer.
    pub fn fetch_buffer(
        &self,
        chunk_key: &ChunkKey,
        destination: &ChunkBufferRef,
        num_bytes: usize,
    ) -> Result<()> {
        self.create_or_recover_data_wrapper_if_not_exists(chunk_key)?;

        let config = self.registry().get(&chunk_key.table_prefix())?;
        let chunk_keys = column_family_keys(&config, chunk_key)?;
        let required = self.disk_cache.get_chunk_buffers_for_caching(&chunk_keys)?;
        debug_assert!(required.contains_key(chunk_key));
        self.inner
            .get_data_wrapper(chunk_key)?
            .populate_chunk_buffers(&required, &ChunkBufferMap::new())?;
        self.disk_cache.cache_table_chunks(&chunk_keys)?;

        let buffer = required
            .get(chunk_key)
            .ok_or_else(|| Error::Internal(format!("missing required buffer for {chunk_key}")))?;
        copy_buffer(buffer, destination, num_bytes)
    }

    /// Metadata scan that additionally persists the wrapper's recoverable
    /// state next to the table's cached chunks.
    pub fn get_chunk_metadata_vec_for_key_prefix(
        &self,
        out: &mut ChunkMetadataVector,
        key_prefix: &ChunkKey,
    ) -> Result<()> {
        self.inner
            .get_chunk_metadata_vec_for_key_prefix(out, key_prefix)?;
        let dir = self
            .disk_cache
            .get_cache_directory_for_table_prefix(key_prefix)?;
        self.inner
            .get_data_wrapper(key_prefix)?
            .serialize_data_wrapper_internals(&dir.join(WRAPPER_METADATA_FILE_NAME))
    }

    pub fn refresh_table(&self, table_key: &ChunkKey, evict_cached_entries: bool) -> Result<()> {
        debug_assert!(table_key.is_table_key());
        self.inner
            .clear_temp_chunk_buffer_map_entries_for_table(table_key);
        if evict_cached_entries {
            self.disk_cache.clear_for_table_prefix(table_key)
        } else {
            self.refresh_table_in_cache(table_key)
        }
    }

    pub fn remove_table_related_ds(&self, db_id: i32, table_id: i32) {
        self.inner.remove_table_related_ds(db_id, table_id);
    }

    fn refresh_table_in_cache(&self, table_key: &ChunkKey) -> Result<()> {
        // A table unused since the last restart may only exist on disk;
        // recover it before deciding what to re-populate.
        if !self.disk_cache.has_cached_metadata_for_prefix(table_key) {
            let mut old_cached_metadata = ChunkMetadataVector::new();
            self.disk_cache
                .recover_cache_for_table(&mut old_cached_metadata, table_key)?;
        }

        // Preserve which chunks were cached, to refresh them after the clear.
        let old_chunk_keys = self.disk_cache.get_cached_chunks_for_prefix(table_key);
        let append_mode = self.registry().get(table_key)?.is_append_mode();
        if append_mode {
            self.refresh_append_table_in_cache(table_key, &old_chunk_keys)
        } else {
            self.refresh_non_append_table_in_cache(table_key, &old_chunk_keys)
        }
    }

    fn get_highest_cached_frag_id(&self, table_key: &ChunkKey) -> Result<i32> {
        let mut last_frag_id = 0;
        if self.disk_cache.has_cached_metadata_for_prefix(table_key) {
            let mut cached_metadata = ChunkMetadataVector::new();
            self.disk_cache
                .get_cached_metadata_for_prefix(&mut cached_metadata, table_key)?;
            for (key, _) in cached_metadata {
                last_frag_id = last_frag_id.max(key.fragment_id());
            }
        }
        Ok(last_frag_id)
    }

    fn refresh_append_table_in_cache(
        &self,
        table_key: &ChunkKey,
        old_chunk_keys: &[ChunkKey],
    ) -> Result<()> {
        self.create_or_recover_data_wrapper_if_not_exists(table_key)?;
        let last_frag_id = self.get_highest_cached_frag_id(table_key)?;

        let mut storage_metadata = ChunkMetadataVector::new();
        self.get_chunk_metadata_vec_for_key_prefix(&mut storage_metadata, table_key)?;

        self.disk_cache
            .cache_metadata_with_frag_id_ge(&storage_metadata, last_frag_id)
            .and_then(|_| self.refresh_chunks_in_cache_by_fragment(old_chunk_keys, last_frag_id))
            .map_err(|e| Error::PostEvictionRefresh(e.to_string()))
    }

    fn refresh_non_append_table_in_cache(
        &self,
        table_key: &ChunkKey,
        old_chunk_keys: &[ChunkKey],
    ) -> Result<()> {
        self.create_or_recover_data_wrapper_if_not_exists(table_key)?;
        // The metadata scan can fail if the connection to storage is lost.
        // Scanning before the clear means such a failure leaves the cache
        // intact.
        let mut storage_metadata = ChunkMetadataVector::new();
        self.get_chunk_metadata_vec_for_key_prefix(&mut storage_metadata, table_key)?;

        self.disk_cache.clear_for_table_prefix(table_key)?;
        self.disk_cache
            .cache_metadata_vec(&storage_metadata)
            .and_then(|_| self.refresh_chunks_in_cache_by_fragment(old_chunk_keys, 0))
            .map_err(|e| Error::PostEvictionRefresh(e.to_string()))
    }

    /// Re-populate previously cached chunks one fragment at a time,
    /// stopping with a warning once the refresh time budget is exhausted.
    fn refresh_chunks_in_cache_by_fragment(
        &self,
        old_chunk_keys: &[ChunkKey],
        start_frag_id: i32,
    ) -> Result<()> {
        let Some(first_key) = old_chunk_keys.first() else {
            return Ok(());
        };
        let table_key = first_key.table_prefix();
        let mut total_time_secs = 0u64;
        let mut fragment_start = Instant::now();
        let mut fragment_id = first_key.fragment_id();
        let mut chunk_keys_in_fragment: Vec<ChunkKey> = Vec::new();
        let mut chunk_keys_to_be_cached: Vec<ChunkKey> = Vec::new();

        for chunk_key in old_chunk_keys {
            if chunk_key.fragment_id() < start_frag_id {
                continue;
            }
            // Index siblings carry no metadata of their own and ride along
            // with their data chunk below.
            if !self.disk_cache.is_metadata_cached(chunk_key) {
                continue;
            }
            if chunk_key.fragment_id() != fragment_id {
                if !chunk_keys_in_fragment.is_empty() {
                    self.populate_fragment(&table_key, &chunk_keys_in_fragment)?;
                    chunk_keys_in_fragment.clear();
                }
                total_time_secs += fragment_start.elapsed().as_secs();
                if total_time_secs >= MAX_REFRESH_TIME_IN_SECONDS {
                    tracing::warn!(
                        table = %table_key,
                        fragment_id,
                        "refresh time exceeded, skipping remaining fragments"
                    );
                    break;
                }
                fragment_start = Instant::now();
                fragment_id = chunk_key.fragment_id();
            }
            if chunk_key.is_varlen_key() {
                debug_assert!(chunk_key.is_varlen_data_key());
                let index_key = chunk_key.index_sibling();
                chunk_keys_in_fragment.push(index_key.clone());
                chunk_keys_to_be_cached.push(index_key);
            }
            chunk_keys_in_fragment.push(chunk_key.clone());
            chunk_keys_to_be_cached.push(chunk_key.clone());
        }
        if !chunk_keys_in_fragment.is_empty() {
            self.populate_fragment(&table_key, &chunk_keys_in_fragment)?;
        }
        if !chunk_keys_to_be_cached.is_empty() {
            self.disk_cache.cache_table_chunks(&chunk_keys_to_be_cached)?;
        }
        Ok(())
    }

    fn populate_fragment(&self, table_key: &ChunkKey, chunk_keys: &[ChunkKey]) -> Result<()> {
        let required = self.disk_cache.get_chunk_buffers_for_caching(chunk_keys)?;
        self.inner
            .get_data_wrapper(table_key)?
            .populate_chunk_buffers(&required, &ChunkBufferMap::new())
    }

    fn recover_data_wrapper_from_disk(
        &self,
        table_key: &ChunkKey,
        chunk_metadata: &ChunkMetadataVector,
    ) -> Result<()> {
        let dir = self
            .disk_cache
            .get_cache_directory_for_table_prefix(table_key)?;
        self.inner
            .get_data_wrapper(table_key)?
            .restore_data_wrapper_internals(&dir.join(WRAPPER_METADATA_FILE_NAME), chunk_metadata)
    }

    fn create_or_recover_data_wrapper_if_not_exists(&self, chunk_key: &ChunkKey) -> Result<()> {
        let table_key = chunk_key.table_prefix();
        if self.inner.create_data_wrapper_if_not_exists(&table_key)? {
            let mut chunk_metadata = ChunkMetadataVector::new();
            if self.disk_cache.has_cached_metadata_for_prefix(&table_key) {
                self.disk_cache
                    .get_cached_metadata_for_prefix(&mut chunk_metadata, &table_key)?;
                self.recover_data_wrapper_from_disk(&table_key, &chunk_metadata)?;
            } else {
                self.inner
                    .get_data_wrapper(&table_key)?
                    .populate_chunk_metadata(&mut chunk_metadata)?;
            }
        }
        Ok(())
    }
}
