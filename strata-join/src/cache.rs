//! Process-wide hash table result and layout caches.
//!
//! The original design keeps these as global statics; here they are one
//! injectable service constructed by the embedder and shared with every
//! orchestrator instance.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use strata_types::ChunkKey;

use crate::table::CompositeHashTable;
use crate::{HashTableLayout, JoinOperator};

/// Identity of one hash table build: the tuple bound, the chunk keys of the
/// inner columns (with dictionary generations folded in), and the join
/// operator. Distinct-equals and bitwise-equals builds never share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTableCacheKey {
    pub num_elements: usize,
    pub chunk_keys: Vec<ChunkKey>,
    pub op_type: JoinOperator,
}

impl HashTableCacheKey {
    /// Tables with negative ids are transient; their builds must never be
    /// cached.
    fn references_transient_table(&self) -> bool {
        self.chunk_keys.iter().any(|key| {
            debug_assert!(key.has_table_prefix());
            key.table_id() < 0
        })
    }
}

/// Result cache plus layout cache, each behind its own mutex.
#[derive(Default)]
#[derive(Debug)]
pub struct JoinHashTableCaches {
    hash_table_cache: Mutex<Vec<(HashTableCacheKey, Arc<CompositeHashTable>)>>,
    hash_type_cache: Mutex<FxHashMap<Vec<ChunkKey>, HashTableLayout>>,
}

impl JoinHashTableCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// First cached table matching `key`, if any.
    pub fn get_cached_table(&self, key: &HashTableCacheKey) -> Option<Arc<CompositeHashTable>> {
        let cache = self
            .hash_table_cache
            .lock()
            .expect("hash table cache poisoned");
        if cache.is_empty() {
            tracing::debug!("hash table cache was empty");
        }
        cache
            .iter()
            .find(|(cached_key, _)| cached_key == key)
            .map(|(_, table)| Arc::clone(table))
    }

    /// Cache a built table, replacing any entry under the same key. Builds
    /// over transient tables are not cached.
    pub fn put_table(&self, key: HashTableCacheKey, table: Arc<CompositeHashTable>) {
        if key.references_transient_table() {
            return;
        }
        let mut cache = self
            .hash_table_cache
            .lock()
            .expect("hash table cache poisoned");
        for (cached_key, cached_table) in cache.iter_mut() {
            if *cached_key == key {
                *cached_table = table;
                return;
            }
        }
        cache.push((key, table));
    }

    /// Short-circuit for the estimator: the distinct-tuple count and
    /// emitted-keys count implied by a previously built table.
    pub fn approximate_tuple_count(&self, key: &HashTableCacheKey) -> (Option<usize>, usize) {
        if key.references_transient_table() {
            return (None, 0);
        }
        let cache = self
            .hash_table_cache
            .lock()
            .expect("hash table cache poisoned");
        for (cached_key, table) in cache.iter() {
            if cached_key == key {
                return (Some(table.entry_count() / 2), table.emitted_keys_count());
            }
        }
        (None, 0)
    }

    pub fn num_cached_tables(&self) -> usize {
        self.hash_table_cache
            .lock()
            .expect("hash table cache poisoned")
            .len()
    }

    /// Record the last successful layout for a set of build chunk keys.
    pub fn set_layout(&self, chunk_keys: &[ChunkKey], layout: HashTableLayout) {
        if chunk_keys.iter().any(|key| key.table_id() < 0) {
            return;
        }
        let mut cache = self
            .hash_type_cache
            .lock()
            .expect("hash type cache poisoned");
        cache.insert(chunk_keys.to_vec(), layout);
    }

    /// Last recorded layout and whether one was found; defaults to
    /// one-to-one when absent.
    pub fn get_layout(&self, chunk_keys: &[ChunkKey]) -> (HashTableLayout, bool) {
        let cache = self
            .hash_type_cache
            .lock()
            .expect("hash type cache poisoned");
        match cache.get(chunk_keys) {
            Some(layout) => (*layout, true),
            None => (HashTableLayout::OneToOne, false),
        }
    }

    pub fn clear_layouts(&self) {
        self.hash_type_cache
            .lock()
            .expect("hash type cache poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HashTableGeometry;

    fn table(entry_count: usize, emitted: usize) -> Arc<CompositeHashTable> {
        let geometry =
            HashTableGeometry::new(HashTableLayout::OneToMany, 4, 1, entry_count, emitted);
        Arc::new(CompositeHashTable::from_cpu_buffer(
            geometry,
            vec![0xff; geometry.total_bytes()],
            0,
        ))
    }

    fn key(table_id: i32, num_elements: usize) -> HashTableCacheKey {
        HashTableCacheKey {
            num_elements,
            chunk_keys: vec![ChunkKey::new(vec![1, table_id, 3])],
            op_type: JoinOperator::Eq,
        }
    }

    #[test]
    fn put_get_and_replace() {
        let caches = JoinHashTableCaches::new();
        let k = key(7, 100);
        assert!(caches.get_cached_table(&k).is_none());
        caches.put_table(k.clone(), table(8, 4));
        assert_eq!(caches.get_cached_table(&k).unwrap().entry_count(), 8);
        // Same key replaces in place.
        caches.put_table(k.clone(), table(16, 4));
        assert_eq!(caches.get_cached_table(&k).unwrap().entry_count(), 16);
        assert_eq!(caches.num_cached_tables(), 1);
    }

    #[test]
    fn distinct_operators_do_not_share_entries() {
        let caches = JoinHashTableCaches::new();
        let eq_key = key(7, 100);
        let bw_key = HashTableCacheKey {
            op_type: JoinOperator::BwEq,
            ..eq_key.clone()
        };
        caches.put_table(eq_key.clone(), table(8, 0));
        assert!(caches.get_cached_table(&bw_key).is_none());
    }

    #[test]
    fn transient_tables_never_cached() {
        let caches = JoinHashTableCaches::new();
        let k = key(-7, 100);
        caches.put_table(k.clone(), table(8, 0));
        assert!(caches.get_cached_table(&k).is_none());
        assert_eq!(caches.approximate_tuple_count(&k), (None, 0));
    }

    #[test]
    fn approximate_count_from_cached_table() {
        let caches = JoinHashTableCaches::new();
        let k = key(7, 100);
        caches.put_table(k.clone(), table(20, 9));
        assert_eq!(caches.approximate_tuple_count(&k), (Some(10), 9));
    }

    #[test]
    fn layout_cache_roundtrip() {
        let caches = JoinHashTableCaches::new();
        let chunks = vec![ChunkKey::new(vec![1, 7, 3])];
        assert_eq!(
            caches.get_layout(&chunks),
            (HashTableLayout::OneToOne, false)
        );
        caches.set_layout(&chunks, HashTableLayout::OneToMany);
        assert_eq!(
            caches.get_layout(&chunks),
            (HashTableLayout::OneToMany, true)
        );
    }
}
