//! Join hash table orchestration: normalising the join condition, picking a
//! layout, building per device, caching results, and exposing the
//! probe-site contract to the code generator.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use strata_result::{Error, Result};
use strata_types::ChunkKey;

use crate::builder::{bucket_for_slot, HashTableBuilder};
use crate::cache::{HashTableCacheKey, JoinHashTableCaches};
use crate::columns::{
    ColumnsForDevice, CompositeKeyInfo, FragmentInfo, GenericKeyHandler, InnerOuterPair,
    JoinColumnFetcher, JoinColumnTypeInfo, QueryInfo, StringDictProxy,
};
use crate::hll::approximate_distinct_tuples;
use crate::layout::HashTableGeometry;
use crate::probe::{
    baseline_hash_join_idx_32, baseline_hash_join_idx_64, build_probe_key,
    get_composite_key_index_32, get_composite_key_index_64, self_join_not_covered_by_left_deep_tree,
    self_join_rejection, ProbeSiteContract,
};
use crate::table::CompositeHashTable;
use crate::{HashTableLayout, JoinOperator, MemoryLevel};

/// A join condition with N equi-predicates whose inner columns share a
/// table.
#[derive(Debug, Clone)]
pub struct JoinCondition {
    pub op_type: JoinOperator,
    pub pairs: Vec<InnerOuterPair>,
}

impl JoinCondition {
    pub fn new(op_type: JoinOperator, pairs: Vec<InnerOuterPair>) -> Self {
        Self { op_type, pairs }
    }

    pub fn is_overlaps(&self) -> bool {
        self.op_type == JoinOperator::Overlaps
    }
}

/// Build-time configuration supplied by the executor.
#[derive(Debug, Clone)]
pub struct JoinHashTableConfig {
    pub memory_level: MemoryLevel,
    pub device_count: usize,
    /// Distributed mode: un-sharded physical inner tables must be
    /// replicated.
    pub cluster_mode: bool,
    pub inner_table_replicated: bool,
    pub inner_table_name: String,
}

impl Default for JoinHashTableConfig {
    fn default() -> Self {
        Self {
            memory_level: MemoryLevel::Cpu,
            device_count: 1,
            cluster_mode: false,
            inner_table_replicated: false,
            inner_table_name: String::new(),
        }
    }
}

/// Composite-key join hash table over N inner/outer column pairs, built per
/// device and cached process-wide through [`JoinHashTableCaches`].
#[derive(Debug)]
pub struct KeyedJoinHashTable {
    condition: JoinCondition,
    query_info: QueryInfo,
    memory_level: MemoryLevel,
    device_count: usize,
    entry_count: usize,
    emitted_keys_count: usize,
    dict_proxies: FxHashMap<i32, Arc<StringDictProxy>>,
    caches: Arc<JoinHashTableCaches>,
    hash_tables_for_device: Vec<Option<Arc<CompositeHashTable>>>,
    layout_override: Option<HashTableLayout>,
    cpu_build_mutex: Mutex<()>,
    #[cfg(feature = "gpu")]
    device_allocators: Vec<Arc<dyn crate::device::DeviceAllocator>>,
}

impl KeyedJoinHashTable {
    /// Make a hash table from an in-flight query's join condition. Fails
    /// with [`Error::HashJoinFail`] when a loop-join fallback is possible
    /// and with a fatal error otherwise.
    pub fn build(
        condition: JoinCondition,
        query_info: QueryInfo,
        preferred_layout: HashTableLayout,
        config: &JoinHashTableConfig,
        dict_proxies: FxHashMap<i32, Arc<StringDictProxy>>,
        caches: Arc<JoinHashTableCaches>,
        fetcher: &dyn JoinColumnFetcher,
    ) -> Result<Self> {
        debug_assert!(config.device_count > 0);
        normalize_column_pairs(&condition)?;
        tracing::debug!(
            layout = %preferred_layout,
            pairs = condition.pairs.len(),
            "building keyed hash table"
        );

        let total_entries = 2 * query_info.num_tuples_upper_bound();
        if total_entries > i32::MAX as usize {
            return Err(Error::TooManyHashEntries(format!(
                "{total_entries} entries exceed the addressable slot space"
            )));
        }
        let shard_count = match config.memory_level {
            MemoryLevel::Gpu => query_info.shard_count,
            MemoryLevel::Cpu => 0,
        };
        let entry_count =
            entries_per_device(total_entries, shard_count, config.device_count, config.memory_level);

        let mut join_hash_table = Self {
            condition,
            query_info,
            memory_level: config.memory_level,
            device_count: config.device_count,
            entry_count,
            emitted_keys_count: 0,
            dict_proxies,
            caches,
            hash_tables_for_device: vec![None; config.device_count.max(1)],
            layout_override: None,
            cpu_build_mutex: Mutex::new(()),
            #[cfg(feature = "gpu")]
            device_allocators: Vec::new(),
        };
        join_hash_table.check_hash_join_replication_constraint(config)?;

        match join_hash_table.reify(preferred_layout, fetcher) {
            Ok(()) => Ok(join_hash_table),
            Err(e) => {
                join_hash_table.free_hash_buffer_memory();
                Err(map_build_failure(e))
            }
        }
    }

    #[cfg(feature = "gpu")]
    pub fn set_device_allocators(
        &mut self,
        allocators: Vec<Arc<dyn crate::device::DeviceAllocator>>,
    ) {
        self.device_allocators = allocators;
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn emitted_keys_count(&self) -> usize {
        self.emitted_keys_count
    }

    pub fn key_component_count(&self) -> usize {
        self.condition.pairs.len()
    }

    /// 8 when any inner column's logical size exceeds 4 bytes, else 4.
    pub fn key_component_width(&self) -> usize {
        for pair in &self.condition.pairs {
            if pair.inner.sql_type.logical_size() > 4 {
                return 8;
            }
        }
        4
    }

    pub fn inner_table_id(&self) -> i32 {
        self.condition.pairs[0].inner.table_id
    }

    pub fn hash_table_for_device(&self, device_id: usize) -> Option<&Arc<CompositeHashTable>> {
        self.hash_tables_for_device
            .get(device_id)
            .and_then(Option::as_ref)
    }

    /// The layout actually built, accounting for a retry override.
    pub fn hash_type(&self) -> HashTableLayout {
        if let Some(layout) = self.layout_override {
            return layout;
        }
        self.hash_tables_for_device
            .iter()
            .flatten()
            .next()
            .map(|t| t.layout())
            .unwrap_or(HashTableLayout::OneToOne)
    }

    /// Byte pointer to the hash buffer for one device's probe sites.
    pub fn join_hash_buffer(&self, device_id: usize) -> Result<&[u8]> {
        self.hash_table_for_device(device_id)
            .map(|t| t.cpu_buffer())
            .ok_or_else(|| {
                Error::Internal(format!("no hash table built for device {device_id}"))
            })
    }

    pub fn offset_buffer_off(&self) -> usize {
        self.device_zero_geometry().offset_buffer_off()
    }

    pub fn count_buffer_off(&self) -> usize {
        self.device_zero_geometry().count_buffer_off()
    }

    pub fn payload_buffer_off(&self) -> usize {
        self.device_zero_geometry().payload_buffer_off()
    }

    fn device_zero_geometry(&self) -> HashTableGeometry {
        self.hash_tables_for_device
            .iter()
            .flatten()
            .next()
            .map(|t| *t.geometry())
            .expect("no hash table built")
    }

    /// Materialise the probe key buffer for one probe site, sign-extending
    /// each outer value to the key component width. Rejects the self-join
    /// pattern the left-deep tree under construction cannot cover.
    pub fn codegen_key(&self, outer_values: &[i64], max_rte_covered: i32) -> Result<Vec<u8>> {
        if outer_values.len() != self.key_component_count() {
            return Err(Error::Internal(format!(
                "probe site supplied {} outer values for {} key components",
                outer_values.len(),
                self.key_component_count()
            )));
        }
        for pair in &self.condition.pairs {
            if self_join_not_covered_by_left_deep_tree(&pair.outer, &pair.inner, max_rte_covered) {
                return Err(self_join_rejection());
            }
        }
        Ok(build_probe_key(outer_values, self.key_component_width()))
    }

    /// One-to-one probe: the payload row id for the outer values, or the
    /// miss sentinel.
    pub fn codegen_slot(
        &self,
        outer_values: &[i64],
        max_rte_covered: i32,
        device_id: usize,
    ) -> Result<i64> {
        if self.hash_type() != HashTableLayout::OneToOne {
            return Err(Error::Internal(
                "codegen_slot is only valid for one-to-one layouts".to_string(),
            ));
        }
        let key = self.codegen_key(outer_values, max_rte_covered)?;
        let buffer = self.join_hash_buffer(device_id)?;
        let key_size = key.len() as i64;
        let entry_count = self.entry_count as i64;
        Ok(match self.key_component_width() {
            4 => baseline_hash_join_idx_32(buffer, &key, key_size, entry_count),
            _ => baseline_hash_join_idx_64(buffer, &key, key_size, entry_count),
        })
    }

    /// Multi-entry probe: the matching row ids for the outer values.
    pub fn codegen_matching_set(
        &self,
        outer_values: &[i64],
        max_rte_covered: i32,
        device_id: usize,
    ) -> Result<Vec<i32>> {
        if !self.hash_type().requires_additional_buffers() {
            return Err(Error::Internal(
                "codegen_matching_set requires a multi-entry layout".to_string(),
            ));
        }
        let key = self.codegen_key(outer_values, max_rte_covered)?;
        let table = self
            .hash_table_for_device(device_id)
            .ok_or_else(|| Error::Internal(format!("no hash table for device {device_id}")))?;
        let geometry = table.geometry();
        let key_dict = &table.cpu_buffer()[..geometry.key_buffer_size()];
        let component_count = self.key_component_count() as i64;
        let entry_count = self.entry_count as i64;
        let slot = match self.key_component_width() {
            4 => get_composite_key_index_32(&key, component_count, key_dict, entry_count),
            _ => get_composite_key_index_64(&key, component_count, key_dict, entry_count),
        };
        Ok(bucket_for_slot(table, slot))
    }

    /// Contract for splicing a one-to-one probe call.
    pub fn slot_contract(&self) -> ProbeSiteContract {
        let width = self.key_component_width();
        ProbeSiteContract {
            symbol: format!("baseline_hash_join_idx_{}", width * 8),
            key_component_width: width,
            key_component_count: self.key_component_count(),
            entry_count: self.entry_count,
            key_buffer_size: self.device_zero_geometry().key_buffer_size(),
            component_buffer_size: self.device_zero_geometry().component_buffer_size(),
        }
    }

    /// Contract for splicing a matching-set probe: the slot lookup symbol
    /// plus the offsets-region placement.
    pub fn matching_set_contract(&self) -> ProbeSiteContract {
        let width = self.key_component_width();
        ProbeSiteContract {
            symbol: format!("get_composite_key_index_{}", width * 8),
            key_component_width: width,
            key_component_count: self.key_component_count(),
            entry_count: self.entry_count,
            key_buffer_size: self.device_zero_geometry().key_buffer_size(),
            component_buffer_size: self.device_zero_geometry().component_buffer_size(),
        }
    }

    pub fn free_hash_buffer_memory(&mut self) {
        for slot in self.hash_tables_for_device.iter_mut() {
            *slot = None;
        }
    }

    fn shard_count(&self) -> usize {
        match self.memory_level {
            MemoryLevel::Gpu => self.query_info.shard_count,
            MemoryLevel::Cpu => 0,
        }
    }

    fn check_hash_join_replication_constraint(&self, config: &JoinHashTableConfig) -> Result<()> {
        if !config.cluster_mode {
            return Ok(());
        }
        if self.inner_table_id() >= 0
            && self.shard_count() == 0
            && !config.inner_table_replicated
        {
            return Err(Error::TableMustBeReplicated(
                config.inner_table_name.clone(),
            ));
        }
        Ok(())
    }

    /// Per-pair dictionary proxies plus the chunk keys (with outer
    /// dictionary generations) that identify this build for caching.
    fn composite_key_info(&self) -> Result<CompositeKeyInfo> {
        let mut info = CompositeKeyInfo::default();
        for pair in &self.condition.pairs {
            let mut chunk_parts = vec![
                pair.inner.db_id,
                pair.inner.table_id,
                pair.inner.column_id,
            ];
            match (pair.inner.dict_id, pair.outer.dict_id) {
                (Some(inner_dict), Some(outer_dict)) if inner_dict != outer_dict => {
                    let inner_proxy = self.proxy(inner_dict)?;
                    let outer_proxy = self.proxy(outer_dict)?;
                    chunk_parts.push(outer_proxy.generation() as i32);
                    info.inner_proxies.push(Some(inner_proxy));
                    info.outer_proxies.push(Some(outer_proxy));
                }
                _ => {
                    info.inner_proxies.push(None);
                    info.outer_proxies.push(None);
                }
            }
            info.cache_key_chunks.push(ChunkKey::new(chunk_parts));
        }
        Ok(info)
    }

    fn proxy(&self, dict_id: i32) -> Result<Arc<StringDictProxy>> {
        self.dict_proxies.get(&dict_id).cloned().ok_or_else(|| {
            Error::ColumnarConversionNotSupported(format!(
                "no dictionary proxy for dictionary {dict_id}"
            ))
        })
    }

    /// Dictionary translation forces a CPU build even for GPU queries.
    fn effective_memory_level(&self) -> MemoryLevel {
        for pair in &self.condition.pairs {
            if let (Some(inner), Some(outer)) = (pair.inner.dict_id, pair.outer.dict_id) {
                if inner != outer {
                    return MemoryLevel::Cpu;
                }
            }
        }
        self.memory_level
    }

    fn reify(&mut self, preferred_layout: HashTableLayout, fetcher: &dyn JoinColumnFetcher) -> Result<()> {
        let composite_key_info = self.composite_key_info()?;
        let (cached_layout, found) = self
            .caches
            .get_layout(&composite_key_info.cache_key_chunks);
        let layout = if found { cached_layout } else { preferred_layout };

        if self.condition.is_overlaps() {
            if self.condition.pairs.len() != 1 {
                return Err(Error::Internal(
                    "overlaps joins take exactly one column pair".to_string(),
                ));
            }
            let forced = if self.condition.pairs[0].outer.is_array {
                HashTableLayout::ManyToMany
            } else {
                HashTableLayout::OneToMany
            };
            return self.reify_with_layout(forced, fetcher).inspect_err(|e| {
                tracing::debug!(error = %e, "overlaps hash table build failed");
            });
        }

        match self.reify_with_layout(layout, fetcher) {
            Ok(()) => Ok(()),
            Err(e) if e.aborts_layout_retry() => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "baseline build failed, retrying one-to-many");
                self.free_hash_buffer_memory();
                self.caches
                    .set_layout(&composite_key_info.cache_key_chunks, HashTableLayout::OneToMany);
                self.reify_with_layout(HashTableLayout::OneToMany, fetcher)
            }
        }
    }

    fn reify_with_layout(
        &mut self,
        layout: HashTableLayout,
        fetcher: &dyn JoinColumnFetcher,
    ) -> Result<()> {
        if self.query_info.fragments.is_empty() {
            return Ok(());
        }
        let shard_count = self.shard_count();
        let mut columns_per_device = Vec::with_capacity(self.device_count);
        for device_id in 0..self.device_count {
            let fragments = if shard_count > 0 {
                only_shards_for_device(&self.query_info.fragments, device_id, self.device_count)
            } else {
                self.query_info.fragments.clone()
            };
            columns_per_device.push(self.fetch_columns_for_device(&fragments, device_id, fetcher)?);
        }

        if layout.requires_additional_buffers() {
            let first_column = columns_per_device
                .first()
                .and_then(|c| c.join_columns.first())
                .ok_or_else(|| Error::Internal("no join columns fetched".to_string()))?;
            self.emitted_keys_count = first_column.num_elems;
            let (tuple_count, _) = self.approximate_tuple_count(&columns_per_device)?;
            let entry_count = 2 * tuple_count.max(1);
            self.entry_count =
                entries_per_device(entry_count, shard_count, self.device_count, self.memory_level);
        }

        let this = &*self;
        let results: Vec<Result<(usize, Arc<CompositeHashTable>)>> = std::thread::scope(|s| {
            let handles: Vec<_> = columns_per_device
                .iter()
                .enumerate()
                .map(|(device_id, columns)| {
                    s.spawn(move || {
                        this.reify_for_device(columns, layout, device_id)
                            .map(|table| (device_id, table))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("device build thread panicked"))
                .collect()
        });
        for result in results {
            let (device_id, table) = result?;
            self.hash_tables_for_device[device_id] = Some(table);
        }
        Ok(())
    }

    fn fetch_columns_for_device(
        &self,
        fragments: &[FragmentInfo],
        device_id: usize,
        fetcher: &dyn JoinColumnFetcher,
    ) -> Result<ColumnsForDevice> {
        let mut join_columns = Vec::with_capacity(self.condition.pairs.len());
        let mut join_column_types = Vec::with_capacity(self.condition.pairs.len());
        for pair in &self.condition.pairs {
            if pair.inner.is_virtual {
                return Err(Error::FailedToJoinOnVirtualColumn);
            }
            let column = fetcher
                .fetch_join_column(&pair.inner, fragments, device_id)
                .map_err(|e| {
                    tracing::debug!(error = %e, "failed to fetch join column");
                    Error::FailedToFetchColumn
                })?;
            join_columns.push(column);
            join_column_types.push(JoinColumnTypeInfo {
                elem_size: pair.inner.sql_type.logical_size(),
                null_val: pair.inner.sql_type.null_sentinel(),
                uses_bw_eq: self.condition.op_type.is_bitwise_eq(),
            });
        }
        Ok(ColumnsForDevice {
            join_columns,
            join_column_types,
        })
    }

    /// Distinct-tuple estimate for multi-entry sizing, short-circuited by a
    /// previously cached build of the same key.
    fn approximate_tuple_count(
        &self,
        columns_per_device: &[ColumnsForDevice],
    ) -> Result<(usize, usize)> {
        match self.effective_memory_level() {
            MemoryLevel::Cpu => {
                let composite_key_info = self.composite_key_info()?;
                let first = &columns_per_device[0];
                let num_elems = first.join_columns[0].num_elems;
                let cache_key = HashTableCacheKey {
                    num_elements: num_elems,
                    chunk_keys: composite_key_info.cache_key_chunks.clone(),
                    op_type: self.condition.op_type,
                };
                if let (Some(count), emitted) = self.caches.approximate_tuple_count(&cache_key) {
                    tracing::debug!(count, emitted, "using cached tuple count");
                    return Ok((count, emitted));
                }
                let handler = GenericKeyHandler::new(
                    &first.join_columns,
                    &first.join_column_types,
                    &composite_key_info.inner_proxies,
                    &composite_key_info.outer_proxies,
                );
                Ok((approximate_distinct_tuples(&handler, num_elems)?, 0))
            }
            MemoryLevel::Gpu => {
                #[cfg(feature = "gpu")]
                {
                    // One partial sketch per device, unified into the first.
                    let composite_key_info = self.composite_key_info()?;
                    let mut unified = crate::hll::HllSketch::new();
                    for columns in columns_per_device {
                        let handler = GenericKeyHandler::new(
                            &columns.join_columns,
                            &columns.join_column_types,
                            &composite_key_info.inner_proxies,
                            &composite_key_info.outer_proxies,
                        );
                        let num_elems = columns.join_columns[0].num_elems;
                        let mut components = vec![0i64; self.key_component_count()];
                        let mut sketch = crate::hll::HllSketch::new();
                        for row in 0..num_elems {
                            if handler.key_for_row(row, &mut components)? {
                                let key = build_probe_key(&components, 8);
                                sketch.update(crate::probe::hash_composite_key(&key));
                            }
                        }
                        unified.unify(&sketch);
                    }
                    return Ok((unified.estimate(), 0));
                }
                #[cfg(not(feature = "gpu"))]
                unreachable!("GPU distinct estimation requires the gpu feature")
            }
        }
    }

    fn reify_for_device(
        &self,
        columns: &ColumnsForDevice,
        layout: HashTableLayout,
        device_id: usize,
    ) -> Result<Arc<CompositeHashTable>> {
        match self.effective_memory_level() {
            MemoryLevel::Cpu => {
                // Only one CPU build proceeds at a time, covering both the
                // cache probe and the build itself.
                let _guard = self
                    .cpu_build_mutex
                    .lock()
                    .expect("cpu build mutex poisoned");
                let composite_key_info = self.composite_key_info()?;
                let num_elems = columns.join_columns.first().map(|c| c.num_elems).unwrap_or(0);
                let cache_key = HashTableCacheKey {
                    num_elements: num_elems,
                    chunk_keys: composite_key_info.cache_key_chunks.clone(),
                    op_type: self.condition.op_type,
                };
                if self.memory_level == MemoryLevel::Cpu {
                    debug_assert_eq!(device_id, 0);
                }
                let table = match self.caches.get_cached_table(&cache_key) {
                    Some(cached) => {
                        tracing::debug!("found a suitable hash table in the cache");
                        cached
                    }
                    None => {
                        let handler = GenericKeyHandler::new(
                            &columns.join_columns,
                            &columns.join_column_types,
                            &composite_key_info.inner_proxies,
                            &composite_key_info.outer_proxies,
                        );
                        let geometry = HashTableGeometry::new(
                            layout,
                            self.key_component_width(),
                            self.key_component_count(),
                            self.entry_count,
                            self.emitted_keys_count,
                        );
                        let built = Arc::new(HashTableBuilder::build_on_cpu(
                            &handler, geometry, num_elems, device_id,
                        )?);
                        if self.inner_table_id() > 0 {
                            self.caches.put_table(cache_key, Arc::clone(&built));
                        }
                        built
                    }
                };
                if self.memory_level == MemoryLevel::Gpu {
                    // Dictionary translation forced a CPU build; mirror the
                    // buffer into device memory of the identical layout.
                    #[cfg(feature = "gpu")]
                    return self.transfer_table_to_device(&table, device_id);
                    #[cfg(not(feature = "gpu"))]
                    unreachable!("GPU memory level requires the gpu feature");
                }
                Ok(table)
            }
            MemoryLevel::Gpu => {
                #[cfg(feature = "gpu")]
                {
                    return self.build_on_device(columns, layout, device_id);
                }
                #[cfg(not(feature = "gpu"))]
                unreachable!("GPU hash join build requires the gpu feature")
            }
        }
    }

    #[cfg(feature = "gpu")]
    fn transfer_table_to_device(
        &self,
        table: &Arc<CompositeHashTable>,
        device_id: usize,
    ) -> Result<Arc<CompositeHashTable>> {
        let allocator = self.device_allocators.get(device_id).ok_or_else(|| {
            Error::Internal(format!("no device allocator for device {device_id}"))
        })?;
        let mut device_table = CompositeHashTable::from_cpu_buffer(
            *table.geometry(),
            table.cpu_buffer().to_vec(),
            device_id,
        );
        crate::device::copy_hash_table_to_device(&mut device_table, allocator.as_ref())?;
        Ok(Arc::new(device_table))
    }

    #[cfg(feature = "gpu")]
    fn build_on_device(
        &self,
        columns: &ColumnsForDevice,
        layout: HashTableLayout,
        device_id: usize,
    ) -> Result<Arc<CompositeHashTable>> {
        // The fill kernels run host-side; the finished buffer moves to the
        // device through the allocator seam.
        let composite_key_info = self.composite_key_info()?;
        let handler = GenericKeyHandler::new(
            &columns.join_columns,
            &columns.join_column_types,
            &composite_key_info.inner_proxies,
            &composite_key_info.outer_proxies,
        );
        let num_elems = columns.join_columns.first().map(|c| c.num_elems).unwrap_or(0);
        let geometry = HashTableGeometry::new(
            layout,
            self.key_component_width(),
            self.key_component_count(),
            self.entry_count,
            self.emitted_keys_count,
        );
        let table = Arc::new(HashTableBuilder::build_on_cpu(
            &handler, geometry, num_elems, device_id,
        )?);
        self.transfer_table_to_device(&table, device_id)
    }
}

fn map_build_failure(e: Error) -> Error {
    match e {
        e @ (Error::TableMustBeReplicated(_) | Error::TooManyHashEntries(_)) => e,
        Error::ColumnarConversionNotSupported(m) => Error::HashJoinFail(format!(
            "Could not build hash tables for equijoin | {m}"
        )),
        Error::OutOfMemory(m) => Error::HashJoinFail(format!(
            "Ran out of memory while building hash tables for equijoin | {m}"
        )),
        Error::HashJoinFail(m) => Error::HashJoinFail(format!(
            "Could not build a 1-to-1 correspondence for columns involved in equijoin | {m}"
        )),
        e @ (Error::FailedToJoinOnVirtualColumn | Error::FailedToFetchColumn) => {
            Error::HashJoinFail(format!(
                "Could not build a 1-to-1 correspondence for columns involved in equijoin | {e}"
            ))
        }
        other => Error::Internal(format!(
            "Fatal error while attempting to build hash tables for join: {other}"
        )),
    }
}

/// All inner columns of the condition must come from one table.
fn normalize_column_pairs(condition: &JoinCondition) -> Result<()> {
    let Some(first) = condition.pairs.first() else {
        return Err(Error::InvalidArgumentError(
            "join condition has no column pairs".to_string(),
        ));
    };
    for pair in &condition.pairs {
        if pair.inner.table_id != first.inner.table_id || pair.inner.db_id != first.inner.db_id {
            return Err(Error::InvalidArgumentError(
                "all inner columns of a keyed join must share a table".to_string(),
            ));
        }
    }
    Ok(())
}

/// Entries each device must hold: shards divide the keyspace, otherwise the
/// table replicates per device.
fn entries_per_device(
    total_entries: usize,
    shard_count: usize,
    device_count: usize,
    memory_level: MemoryLevel,
) -> usize {
    let entries_per_shard = if shard_count > 0 {
        total_entries.div_ceil(shard_count)
    } else {
        total_entries
    };
    if memory_level == MemoryLevel::Gpu && shard_count > 0 {
        let shards_per_device = shard_count.div_ceil(device_count);
        entries_per_shard * shards_per_device
    } else {
        entries_per_shard
    }
}

/// The fragments of the shards assigned round-robin to one device.
fn only_shards_for_device(
    fragments: &[FragmentInfo],
    device_id: usize,
    device_count: usize,
) -> Vec<FragmentInfo> {
    fragments
        .iter()
        .filter(|f| f.shard_id as usize % device_count == device_id)
        .cloned()
        .collect()
}
