//! Disk-backed cache for foreign table chunks and metadata.
//!
//! Chunks persist through a page-backed [`ChunkFileMgr`] under one directory
//! per table; membership is tracked in ordered key sets, and a per-table LRU
//! enforces a page quota derived from the configured size limit. Locking is
//! split between a metadata set and the chunk state; methods take the locks
//! in sequence, never nested, and upgrade from shared to exclusive only
//! after releasing the shared lock.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use strata_result::{Error, Result};
use strata_storage::{ChunkBufferMap, ChunkBufferRef, ChunkFileMgr, DEFAULT_PAGE_SIZE, MAX_FILE_PAGES};
use strata_types::{ChunkKey, ChunkMetadataVector};

use crate::eviction::LruEvictionAlgorithm;

/// Which table classes the disk cache serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskCacheLevel {
    #[default]
    None,
    Fsi,
    NonFsi,
    All,
}

impl DiskCacheLevel {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, DiskCacheLevel::None)
    }

    pub fn is_enabled_for_fsi(&self) -> bool {
        matches!(self, DiskCacheLevel::Fsi | DiskCacheLevel::All)
    }

    pub fn is_enabled_for_mutable_tables(&self) -> bool {
        matches!(self, DiskCacheLevel::NonFsi | DiskCacheLevel::All)
    }
}

/// Configuration for the disk cache.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub path: PathBuf,
    pub enabled_level: DiskCacheLevel,
    pub size_limit: u64,
    pub page_size: usize,
    pub num_reader_threads: usize,
}

impl DiskCacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled_level: DiskCacheLevel::Fsi,
            // 20GB default.
            size_limit: 21_474_836_480,
            page_size: DEFAULT_PAGE_SIZE,
            num_reader_threads: 0,
        }
    }
}

#[derive(Default)]
struct TableEvictionTracker {
    eviction_alg: LruEvictionAlgorithm,
    num_pages: usize,
}

struct ChunkState {
    cached_chunks: BTreeSet<ChunkKey>,
    trackers: BTreeMap<ChunkKey, TableEvictionTracker>,
    max_pages_per_table: usize,
    max_cached_bytes: u64,
}

/// Disk cache for foreign storage chunks and chunk metadata.
pub struct ForeignStorageCache {
    file_mgr: ChunkFileMgr,
    chunks: RwLock<ChunkState>,
    metadata: RwLock<BTreeSet<ChunkKey>>,
    num_chunks_added: AtomicUsize,
    num_metadata_added: AtomicUsize,
}

impl ForeignStorageCache {
    pub fn new(config: &DiskCacheConfig) -> Result<Self> {
        let file_mgr = ChunkFileMgr::new(&config.path, config.page_size)?;
        let cache = Self {
            file_mgr,
            chunks: RwLock::new(ChunkState {
                cached_chunks: BTreeSet::new(),
                trackers: BTreeMap::new(),
                max_pages_per_table: 0,
                max_cached_bytes: 0,
            }),
            metadata: RwLock::new(BTreeSet::new()),
            num_chunks_added: AtomicUsize::new(0),
            num_metadata_added: AtomicUsize::new(0),
        };
        cache.set_limit(config.size_limit)?;
        Ok(cache)
    }

    pub fn page_size(&self) -> usize {
        self.file_mgr.page_size()
    }

    /// Per-table byte budget implied by the current page quota.
    pub fn get_limit(&self) -> u64 {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        (state.max_pages_per_table * self.file_mgr.page_size()) as u64
    }

    pub fn max_pages_per_table(&self) -> usize {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        state.max_pages_per_table
    }

    /// Pages currently charged against a table's quota.
    pub fn num_pages_used(&self, table_key: &ChunkKey) -> usize {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        state
            .trackers
            .get(table_key)
            .map(|t| t.num_pages)
            .unwrap_or(0)
    }

    pub fn num_cached_chunks(&self) -> usize {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        state.cached_chunks.len()
    }

    pub fn num_cached_metadata(&self) -> usize {
        self.metadata
            .read()
            .expect("metadata lock poisoned")
            .len()
    }

    pub fn num_chunks_added(&self) -> usize {
        self.num_chunks_added.load(Ordering::Relaxed)
    }

    pub fn num_metadata_added(&self) -> usize {
        self.num_metadata_added.load(Ordering::Relaxed)
    }

    /// Cache one externally populated chunk buffer. Returns false without
    /// caching when the chunk alone exceeds the table's page budget; the
    /// chunk's metadata is recorded only on acceptance.
    pub fn cache_chunk(&self, chunk_key: &ChunkKey, buffer: &ChunkBufferRef) -> Result<bool> {
        let accepted = {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            let size = buffer.lock().expect("chunk buffer lock poisoned").size();
            insert_chunk_into_eviction_alg(&mut state, &self.file_mgr, chunk_key, size)?
        };
        if !accepted {
            tracing::debug!(key = %chunk_key, "chunk too large for table cache budget");
            return Ok(false);
        }
        let (bytes, chunk_metadata) = {
            let guard = buffer.lock().expect("chunk buffer lock poisoned");
            (guard.as_bytes().to_vec(), guard.metadata().cloned())
        };
        self.file_mgr.put_buffer(chunk_key, &bytes, chunk_metadata)?;
        self.file_mgr.checkpoint()?;
        self.num_chunks_added.fetch_add(1, Ordering::Relaxed);
        self.metadata
            .write()
            .expect("metadata lock poisoned")
            .insert(chunk_key.clone());
        Ok(true)
    }

    /// Bulk variant of [`ForeignStorageCache::cache_chunk`] for buffers that
    /// were already populated through the cache's own file manager. All keys
    /// must share a table; a single per-table checkpoint runs at the end.
    pub fn cache_table_chunks(&self, chunk_keys: &[ChunkKey]) -> Result<()> {
        let Some(first) = chunk_keys.first() else {
            return Err(Error::Internal("no chunk keys to cache".to_string()));
        };
        let db_id = first.db_id();
        let table_id = first.table_id();
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            state
                .trackers
                .entry(ChunkKey::table(db_id, table_id))
                .or_default();
            for chunk_key in chunk_keys {
                debug_assert_eq!(chunk_key.db_id(), db_id);
                debug_assert_eq!(chunk_key.table_id(), table_id);
                let buffer = self.file_mgr.get_buffer(chunk_key)?;
                let size = buffer.lock().expect("chunk buffer lock poisoned").size();
                self.num_chunks_added.fetch_add(1, Ordering::Relaxed);
                insert_chunk_into_eviction_alg(&mut state, &self.file_mgr, chunk_key, size)?;
            }
        }
        self.file_mgr.checkpoint_table(db_id, table_id)
    }

    /// Membership test plus LRU touch; returns the cached buffer when
    /// present.
    pub fn get_cached_chunk_if_exists(&self, chunk_key: &ChunkKey) -> Option<ChunkBufferRef> {
        {
            let state = self.chunks.read().expect("chunk state lock poisoned");
            if !state.cached_chunks.contains(chunk_key) {
                return None;
            }
        }
        let mut state = self.chunks.write().expect("chunk state lock poisoned");
        if let Some(tracker) = state.trackers.get_mut(&chunk_key.table_prefix()) {
            tracker.eviction_alg.touch_chunk(chunk_key);
        }
        drop(state);
        self.file_mgr.get_buffer(chunk_key).ok()
    }

    pub fn is_metadata_cached(&self, chunk_key: &ChunkKey) -> bool {
        self.metadata
            .read()
            .expect("metadata lock poisoned")
            .contains(chunk_key)
    }

    /// Rebuild the cache's in-memory state for one table from the file
    /// manager after a restart. Chunks whose file buffers kept pages rejoin
    /// the LRU; metadata-only buffers rejoin the metadata set alone.
    pub fn recover_cache_for_table(
        &self,
        out: &mut ChunkMetadataVector,
        table_key: &ChunkKey,
    ) -> Result<bool> {
        debug_assert!(table_key.is_table_key());
        debug_assert!(out.is_empty());
        self.file_mgr.get_chunk_metadata_for_prefix(out, table_key);
        {
            let mut metadata = self.metadata.write().expect("metadata lock poisoned");
            for (key, _) in out.iter() {
                metadata.insert(key.clone());
            }
        }
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            state.trackers.entry(table_key.clone()).or_default();
            for (key, _) in out.iter() {
                // Zero pages means the chunk was metadata-only.
                let Ok(buffer) = self.file_mgr.get_buffer(key) else {
                    continue;
                };
                let (pages, size) = {
                    let guard = buffer.lock().expect("chunk buffer lock poisoned");
                    (guard.page_count(), guard.size())
                };
                if pages > 0 {
                    insert_chunk_into_eviction_alg(&mut state, &self.file_mgr, key, size)?;
                }
            }
        }
        Ok(!out.is_empty())
    }

    pub fn evict_then_erase_chunk(&self, chunk_key: &ChunkKey) {
        let mut state = self.chunks.write().expect("chunk state lock poisoned");
        evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, chunk_key);
    }

    /// Cache a batch of chunk metadata. Creates (or reuses) the backing file
    /// buffers, pairing each variable-length data chunk with its index
    /// sibling, and invalidates any previously cached chunk data for the
    /// keys: refreshed metadata means the old data is stale.
    pub fn cache_metadata_vec(&self, metadata_vec: &ChunkMetadataVector) -> Result<()> {
        {
            let mut metadata = self.metadata.write().expect("metadata lock poisoned");
            for (key, _) in metadata_vec {
                metadata.insert(key.clone());
            }
        }
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            for (key, chunk_metadata) in metadata_vec {
                let buffer = if self.file_mgr.has_buffer(key) {
                    self.file_mgr.get_buffer(key)?
                } else {
                    self.file_mgr.create_buffer(key)
                };
                let index_buffer = if key.is_varlen_key() {
                    // Metadata is always carried by the data portion.
                    debug_assert!(key.is_varlen_data_key());
                    let index_key = key.index_sibling();
                    Some((
                        index_key.clone(),
                        if self.file_mgr.has_buffer(&index_key) {
                            self.file_mgr.get_buffer(&index_key)?
                        } else {
                            self.file_mgr.create_buffer(&index_key)
                        },
                    ))
                } else {
                    None
                };

                {
                    let mut guard = buffer.lock().expect("chunk buffer lock poisoned");
                    guard.set_metadata(chunk_metadata.clone());
                    guard.set_updated();
                }
                evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, key);
                if let Some((index_key, index_buffer)) = index_buffer {
                    index_buffer
                        .lock()
                        .expect("chunk buffer lock poisoned")
                        .set_updated();
                    evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, &index_key);
                }
                self.num_metadata_added.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.file_mgr.checkpoint()
    }

    /// Bulk metadata caching restricted to fragments at or above `frag_id`,
    /// used by append-mode refresh.
    pub fn cache_metadata_with_frag_id_ge(
        &self,
        metadata_vec: &ChunkMetadataVector,
        frag_id: i32,
    ) -> Result<()> {
        let filtered: ChunkMetadataVector = metadata_vec
            .iter()
            .filter(|(key, _)| key.fragment_id() >= frag_id)
            .cloned()
            .collect();
        self.cache_metadata_vec(&filtered)
    }

    pub fn get_cached_metadata_for_prefix(
        &self,
        out: &mut ChunkMetadataVector,
        prefix: &ChunkKey,
    ) -> Result<()> {
        let metadata = self.metadata.read().expect("metadata lock poisoned");
        for key in metadata.range(prefix.clone()..prefix.upper_bound_of_prefix()) {
            let buffer = self.file_mgr.get_buffer(key)?;
            let guard = buffer.lock().expect("chunk buffer lock poisoned");
            if let Some(chunk_metadata) = guard.metadata() {
                out.push((key.clone(), chunk_metadata.clone()));
            }
        }
        Ok(())
    }

    pub fn has_cached_metadata_for_prefix(&self, prefix: &ChunkKey) -> bool {
        let metadata = self.metadata.read().expect("metadata lock poisoned");
        metadata
            .range(prefix.clone()..prefix.upper_bound_of_prefix())
            .next()
            .is_some()
    }

    /// Drop all cached chunks and metadata for one table, including the
    /// table's on-disk state. Requires a table prefix.
    pub fn clear_for_table_prefix(&self, prefix: &ChunkKey) -> Result<()> {
        debug_assert!(prefix.is_table_key());
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            let keys: Vec<ChunkKey> = state
                .cached_chunks
                .range(prefix.clone()..prefix.upper_bound_of_prefix())
                .cloned()
                .collect();
            for key in keys {
                evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, &key);
            }
        }
        {
            let mut metadata = self.metadata.write().expect("metadata lock poisoned");
            let keys: Vec<ChunkKey> = metadata
                .range(prefix.clone()..prefix.upper_bound_of_prefix())
                .cloned()
                .collect();
            for key in keys {
                metadata.remove(&key);
            }
        }
        self.file_mgr
            .remove_table_related_ds(prefix.db_id(), prefix.table_id())
    }

    /// Drop everything in the cache.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            let keys: Vec<ChunkKey> = state.cached_chunks.iter().cloned().collect();
            for key in keys {
                evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, &key);
            }
        }
        let table_keys: BTreeSet<ChunkKey> = {
            let mut metadata = self.metadata.write().expect("metadata lock poisoned");
            let tables = metadata.iter().map(|k| k.table_prefix()).collect();
            metadata.clear();
            tables
        };
        for table_key in table_keys {
            self.file_mgr
                .remove_table_related_ds(table_key.db_id(), table_key.table_id())?;
        }
        Ok(())
    }

    /// Reconfigure the cache size. Rejects limits below one storage file;
    /// recomputes the per-table page quota and evicts from every table until
    /// it fits.
    pub fn set_limit(&self, limit: u64) -> Result<()> {
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            let file_size = (self.file_mgr.page_size() * MAX_FILE_PAGES) as u64;
            if limit < file_size {
                return Err(Error::CacheTooSmall(format!(
                    "Could not create cache with size {limit}.  \
                     Minimum cache size is {file_size}"
                )));
            }
            let max_num_files = limit.div_ceil(file_size);
            state.max_pages_per_table = max_num_files as usize * MAX_FILE_PAGES;
            let table_keys: Vec<ChunkKey> = state.trackers.keys().cloned().collect();
            for table_key in table_keys {
                loop {
                    let over = state
                        .trackers
                        .get(&table_key)
                        .is_some_and(|t| t.num_pages > state.max_pages_per_table);
                    if !over {
                        break;
                    }
                    let victim = state
                        .trackers
                        .get_mut(&table_key)
                        .expect("tracker disappeared")
                        .eviction_alg
                        .evict_next_chunk()?;
                    erase_chunk(&mut state, &self.file_mgr, &victim);
                }
            }
            state.max_cached_bytes = limit;
        }
        self.file_mgr.checkpoint()
    }

    pub fn get_cached_chunks_for_prefix(&self, prefix: &ChunkKey) -> Vec<ChunkKey> {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        state
            .cached_chunks
            .range(prefix.clone()..prefix.upper_bound_of_prefix())
            .cloned()
            .collect()
    }

    /// Hand out empty destination buffers for chunks about to be populated
    /// and cached. The chunks must not be cached yet and their buffers must
    /// hold no stale pages.
    pub fn get_chunk_buffers_for_caching(&self, chunk_keys: &[ChunkKey]) -> Result<ChunkBufferMap> {
        let state = self.chunks.read().expect("chunk state lock poisoned");
        let mut map = ChunkBufferMap::new();
        for key in chunk_keys {
            if state.cached_chunks.contains(key) {
                return Err(Error::Internal(format!(
                    "chunk {key} is already cached"
                )));
            }
            let buffer = self.file_mgr.get_buffer(key)?;
            {
                let mut guard = buffer.lock().expect("chunk buffer lock poisoned");
                if guard.page_count() != 0 {
                    return Err(Error::Internal(format!(
                        "chunk {key} still holds {} stale pages",
                        guard.page_count()
                    )));
                }
                guard.reset_to_empty();
            }
            map.insert(key.clone(), buffer);
        }
        Ok(map)
    }

    pub fn delete_buffer_if_exists(&self, chunk_key: &ChunkKey) -> Result<()> {
        {
            let mut metadata = self.metadata.write().expect("metadata lock poisoned");
            if !metadata.remove(chunk_key) {
                return Ok(());
            }
        }
        {
            let mut state = self.chunks.write().expect("chunk state lock poisoned");
            evict_then_erase_chunk_unlocked(&mut state, &self.file_mgr, chunk_key);
        }
        self.file_mgr.delete_buffer(chunk_key)
    }

    /// Directory holding the table's cached chunk files, created on demand.
    pub fn get_cache_directory_for_table_prefix(&self, prefix: &ChunkKey) -> Result<PathBuf> {
        debug_assert!(prefix.has_table_prefix());
        self.file_mgr.ensure_table_dir(&prefix.table_prefix())
    }
}

// The helpers below assume the chunk state lock is already held exclusively.

fn erase_chunk(state: &mut ChunkState, file_mgr: &ChunkFileMgr, chunk_key: &ChunkKey) {
    if !state.cached_chunks.remove(chunk_key) {
        return;
    }
    let freed = file_mgr
        .get_buffer(chunk_key)
        .ok()
        .map(|buffer| {
            buffer
                .lock()
                .expect("chunk buffer lock poisoned")
                .free_chunk_pages()
        })
        .unwrap_or(0);
    if let Some(tracker) = state.trackers.get_mut(&chunk_key.table_prefix()) {
        tracker.num_pages = tracker.num_pages.saturating_sub(freed);
    }
}

fn evict_then_erase_chunk_unlocked(
    state: &mut ChunkState,
    file_mgr: &ChunkFileMgr,
    chunk_key: &ChunkKey,
) {
    let table_key = chunk_key.table_prefix();
    match state.trackers.get_mut(&table_key) {
        Some(tracker) => tracker.eviction_alg.remove_chunk(chunk_key),
        None => return,
    }
    erase_chunk(state, file_mgr, chunk_key);
}

/// Charge a chunk against its table's page quota, evicting least recently
/// used chunks of the same table until it fits. Returns false when the chunk
/// alone exceeds the quota. Eviction never crosses table boundaries.
fn insert_chunk_into_eviction_alg(
    state: &mut ChunkState,
    file_mgr: &ChunkFileMgr,
    chunk_key: &ChunkKey,
    chunk_size: usize,
) -> Result<bool> {
    let page_size = file_mgr.page_size();
    let num_pages_for_chunk = chunk_size.div_ceil(page_size);
    if num_pages_for_chunk > state.max_pages_per_table {
        return Ok(false);
    }
    let table_key = chunk_key.table_prefix();
    state.trackers.entry(table_key.clone()).or_default();
    loop {
        let num_pages = state
            .trackers
            .get(&table_key)
            .expect("tracker disappeared")
            .num_pages;
        if num_pages + num_pages_for_chunk <= state.max_pages_per_table {
            break;
        }
        let victim = state
            .trackers
            .get_mut(&table_key)
            .expect("tracker disappeared")
            .eviction_alg
            .evict_next_chunk()?;
        erase_chunk(state, file_mgr, &victim);
    }
    let tracker = state
        .trackers
        .get_mut(&table_key)
        .expect("tracker disappeared");
    tracker.eviction_alg.touch_chunk(chunk_key);
    tracker.num_pages += num_pages_for_chunk;
    state.cached_chunks.insert(chunk_key.clone());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ForeignStorageBuffer;
    use std::sync::{Arc, Mutex};
    use strata_types::{ChunkMetadata, ChunkStats, SqlType, VARLEN_DATA_SUB_KEY};
    use tempfile::TempDir;

    // With an 8-byte page and the minimum size limit, each table may hold
    // MAX_FILE_PAGES pages; chunks of half that fill the quota in pairs.
    const PAGE_SIZE: usize = 8;
    const HALF_QUOTA_BYTES: usize = PAGE_SIZE * MAX_FILE_PAGES / 2;

    fn test_cache(dir: &TempDir) -> ForeignStorageCache {
        let config = DiskCacheConfig {
            page_size: PAGE_SIZE,
            size_limit: (PAGE_SIZE * MAX_FILE_PAGES) as u64,
            ..DiskCacheConfig::new(dir.path())
        };
        ForeignStorageCache::new(&config).unwrap()
    }

    fn mem_buffer(bytes: &[u8]) -> ChunkBufferRef {
        let mut buffer = ForeignStorageBuffer::new();
        use strata_storage::ChunkBuffer;
        buffer.append(bytes);
        buffer.set_metadata(ChunkMetadata::new(
            SqlType::Int,
            bytes.len(),
            bytes.len() / 4,
            ChunkStats::default(),
        ));
        Arc::new(Mutex::new(buffer))
    }

    #[test]
    fn cache_chunk_roundtrips_bytes() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let key = ChunkKey::chunk(1, 1, 1, 0);
        let payload = vec![7u8; 100];
        assert!(cache.cache_chunk(&key, &mem_buffer(&payload)).unwrap());
        let cached = cache.get_cached_chunk_if_exists(&key).unwrap();
        let guard = cached.lock().unwrap();
        assert_eq!(guard.as_bytes(), payload.as_slice());
        assert!(cache.is_metadata_cached(&key));
        assert_eq!(cache.num_chunks_added(), 1);
    }

    #[test]
    fn lru_eviction_on_quota() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let a = ChunkKey::chunk(1, 1, 1, 0);
        let b = ChunkKey::chunk(1, 1, 1, 1);
        let c = ChunkKey::chunk(1, 1, 1, 2);
        let payload = vec![0u8; HALF_QUOTA_BYTES];
        assert!(cache.cache_chunk(&a, &mem_buffer(&payload)).unwrap());
        assert!(cache.cache_chunk(&b, &mem_buffer(&payload)).unwrap());
        assert!(cache.cache_chunk(&c, &mem_buffer(&payload)).unwrap());

        let table = ChunkKey::table(1, 1);
        let cached = cache.get_cached_chunks_for_prefix(&table);
        assert_eq!(cached, vec![b.clone(), c.clone()]);
        assert_eq!(cache.num_pages_used(&table), MAX_FILE_PAGES);
    }

    #[test]
    fn touch_order_controls_eviction() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let a = ChunkKey::chunk(1, 1, 1, 0);
        let b = ChunkKey::chunk(1, 1, 1, 1);
        let c = ChunkKey::chunk(1, 1, 1, 2);
        let payload = vec![0u8; HALF_QUOTA_BYTES];
        cache.cache_chunk(&a, &mem_buffer(&payload)).unwrap();
        cache.cache_chunk(&b, &mem_buffer(&payload)).unwrap();
        // Touch `a`, making `b` the eviction victim.
        assert!(cache.get_cached_chunk_if_exists(&a).is_some());
        cache.cache_chunk(&c, &mem_buffer(&payload)).unwrap();
        let cached = cache.get_cached_chunks_for_prefix(&ChunkKey::table(1, 1));
        assert_eq!(cached, vec![a, c]);
    }

    #[test]
    fn oversized_chunk_rejected_without_metadata() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let key = ChunkKey::chunk(1, 1, 1, 0);
        let payload = vec![0u8; PAGE_SIZE * (MAX_FILE_PAGES + 1)];
        assert!(!cache.cache_chunk(&key, &mem_buffer(&payload)).unwrap());
        assert!(!cache.is_metadata_cached(&key));
        assert_eq!(cache.num_cached_chunks(), 0);
        assert_eq!(cache.num_chunks_added(), 0);
    }

    #[test]
    fn eviction_never_crosses_tables() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let t1_chunk = ChunkKey::chunk(1, 1, 1, 0);
        let t2_a = ChunkKey::chunk(1, 2, 1, 0);
        let t2_b = ChunkKey::chunk(1, 2, 1, 1);
        let t2_c = ChunkKey::chunk(1, 2, 1, 2);
        let payload = vec![0u8; HALF_QUOTA_BYTES];
        cache.cache_chunk(&t1_chunk, &mem_buffer(&payload)).unwrap();
        cache.cache_chunk(&t2_a, &mem_buffer(&payload)).unwrap();
        cache.cache_chunk(&t2_b, &mem_buffer(&payload)).unwrap();
        cache.cache_chunk(&t2_c, &mem_buffer(&payload)).unwrap();
        // Table 1's chunk survives table 2's evictions.
        assert!(cache.get_cached_chunk_if_exists(&t1_chunk).is_some());
        assert_eq!(
            cache.get_cached_chunks_for_prefix(&ChunkKey::table(1, 2)).len(),
            2
        );
    }

    #[test]
    fn set_limit_below_one_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let err = cache
            .set_limit((PAGE_SIZE * MAX_FILE_PAGES) as u64 - 1)
            .unwrap_err();
        assert!(matches!(err, Error::CacheTooSmall(_)));
    }

    #[test]
    fn clear_for_table_prefix_erases_both_sets() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let key = ChunkKey::chunk(1, 1, 1, 0);
        let other = ChunkKey::chunk(1, 2, 1, 0);
        cache.cache_chunk(&key, &mem_buffer(&[1; 16])).unwrap();
        cache.cache_chunk(&other, &mem_buffer(&[1; 16])).unwrap();
        cache.clear_for_table_prefix(&ChunkKey::table(1, 1)).unwrap();
        assert!(cache.get_cached_chunk_if_exists(&key).is_none());
        assert!(!cache.is_metadata_cached(&key));
        assert_eq!(cache.num_pages_used(&ChunkKey::table(1, 1)), 0);
        // The other table is untouched.
        assert!(cache.get_cached_chunk_if_exists(&other).is_some());
    }

    #[test]
    fn metadata_vec_creates_varlen_sibling_buffers() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let data_key = ChunkKey::varlen_chunk(1, 1, 1, 0, VARLEN_DATA_SUB_KEY);
        let metadata = ChunkMetadata::new(SqlType::Text, 10, 3, ChunkStats::default());
        cache
            .cache_metadata_vec(&vec![(data_key.clone(), metadata)])
            .unwrap();
        assert!(cache.is_metadata_cached(&data_key));
        assert_eq!(cache.num_metadata_added(), 1);
        // Both the data and the index buffer now exist for population.
        let buffers = cache
            .get_chunk_buffers_for_caching(&[data_key.clone(), data_key.index_sibling()])
            .unwrap();
        assert_eq!(buffers.len(), 2);
    }

    #[test]
    fn metadata_refresh_invalidates_chunk_data() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(&dir);
        let key = ChunkKey::chunk(1, 1, 1, 0);
        cache.cache_chunk(&key, &mem_buffer(&[1; 32])).unwrap();
        assert!(cache.get_cached_chunk_if_exists(&key).is_some());
        let metadata = ChunkMetadata::new(SqlType::Int, 32, 8, ChunkStats::default());
        cache
            .cache_metadata_vec(&vec![(key.clone(), metadata)])
            .unwrap();
        assert!(cache.get_cached_chunk_if_exists(&key).is_none());
        assert!(cache.is_metadata_cached(&key));
    }

    #[test]
    fn recover_after_checkpoint_restores_chunks_and_metadata() {
        let dir = TempDir::new().unwrap();
        let key = ChunkKey::chunk(1, 1, 1, 0);
        let payload = vec![3u8; 40];
        {
            let cache = test_cache(&dir);
            assert!(cache.cache_chunk(&key, &mem_buffer(&payload)).unwrap());
        }
        let cache = test_cache(&dir);
        let mut recovered = ChunkMetadataVector::new();
        assert!(cache
            .recover_cache_for_table(&mut recovered, &ChunkKey::table(1, 1))
            .unwrap());
        assert_eq!(recovered.len(), 1);
        assert!(cache.is_metadata_cached(&key));
        let cached = cache.get_cached_chunk_if_exists(&key).unwrap();
        assert_eq!(cached.lock().unwrap().as_bytes(), payload.as_slice());
    }
}
