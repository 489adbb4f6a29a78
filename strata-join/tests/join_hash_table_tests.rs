use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use strata_join::{
    build_probe_key, get_composite_key_index_32, ColumnRef, FragmentInfo, HashTableLayout,
    InnerOuterPair, JoinColumn, JoinColumnFetcher, JoinCondition, JoinHashTableCaches,
    JoinHashTableConfig, JoinOperator, KeyedJoinHashTable, QueryInfo, StringDictProxy,
};
use strata_result::{Error, Result};
use strata_types::SqlType;

/// Serves join columns from in-memory vectors keyed by column id.
struct VecFetcher {
    columns: FxHashMap<i32, JoinColumn>,
}

impl VecFetcher {
    fn new() -> Self {
        Self {
            columns: FxHashMap::default(),
        }
    }

    fn with_i32_column(mut self, column_id: i32, values: &[i32]) -> Self {
        self.columns
            .insert(column_id, JoinColumn::from_i32_values(values));
        self
    }

    fn with_i64_column(mut self, column_id: i32, values: &[i64]) -> Self {
        self.columns
            .insert(column_id, JoinColumn::from_i64_values(values));
        self
    }

    fn with_i16_column(mut self, column_id: i32, values: &[i16]) -> Self {
        self.columns
            .insert(column_id, JoinColumn::from_i16_values(values));
        self
    }
}

impl JoinColumnFetcher for VecFetcher {
    fn fetch_join_column(
        &self,
        column: &ColumnRef,
        _fragments: &[FragmentInfo],
        _device_id: usize,
    ) -> Result<JoinColumn> {
        self.columns
            .get(&column.column_id)
            .cloned()
            .ok_or(Error::NotFound)
    }
}

fn single_fragment_info(num_tuples: usize) -> QueryInfo {
    strata_test_utils::init_tracing_for_tests();
    QueryInfo {
        fragments: vec![FragmentInfo {
            fragment_id: 0,
            shard_id: 0,
            num_tuples,
        }],
        shard_count: 0,
    }
}

fn int_pair(table_id: i32, column_id: i32, sql_type: SqlType) -> InnerOuterPair {
    InnerOuterPair {
        inner: ColumnRef::new(1, table_id, column_id, sql_type).with_rte_idx(1),
        outer: ColumnRef::new(1, 100, column_id, sql_type).with_rte_idx(0),
    }
}

fn build_single_column(
    values_len: usize,
    fetcher: &VecFetcher,
    sql_type: SqlType,
    preferred: HashTableLayout,
    caches: Arc<JoinHashTableCaches>,
) -> Result<KeyedJoinHashTable> {
    let condition = JoinCondition::new(JoinOperator::Eq, vec![int_pair(10, 1, sql_type)]);
    KeyedJoinHashTable::build(
        condition,
        single_fragment_info(values_len),
        preferred,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        fetcher,
    )
}

// Small one-to-one build: probes resolve to the build row ids and a missing
// key hits the sentinel.
#[test]
fn one_to_one_small_build() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 2, 3, 4]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let table = build_single_column(4, &fetcher, SqlType::Int, HashTableLayout::OneToOne, caches)
        .unwrap();

    assert_eq!(table.hash_type(), HashTableLayout::OneToOne);
    assert_eq!(table.entry_count(), 8);
    assert_eq!(table.key_component_width(), 4);
    assert_eq!(table.codegen_slot(&[3], 1, 0).unwrap(), 2);
    assert_eq!(table.codegen_slot(&[5], 1, 0).unwrap(), -1);
    assert_eq!(table.codegen_slot(&[1], 1, 0).unwrap(), 0);
}

// A duplicated composite key fails the one-to-one build, escalates to
// one-to-many, and records the escalation in the layout cache.
#[test]
fn duplicate_key_escalates_to_one_to_many() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 1, 2]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let table = build_single_column(
        3,
        &fetcher,
        SqlType::Int,
        HashTableLayout::OneToOne,
        Arc::clone(&caches),
    )
    .unwrap();

    assert_eq!(table.hash_type(), HashTableLayout::OneToMany);
    let mut bucket_one = table.codegen_matching_set(&[1], 1, 0).unwrap();
    bucket_one.sort_unstable();
    assert_eq!(bucket_one, vec![0, 1]);
    assert_eq!(table.codegen_matching_set(&[2], 1, 0).unwrap(), vec![2]);
    assert!(table.codegen_matching_set(&[9], 1, 0).unwrap().is_empty());

    // The layout cache remembers the escalation for the same chunk keys.
    let chunk_keys = vec![strata_types::ChunkKey::new(vec![1, 10, 1])];
    assert_eq!(
        caches.get_layout(&chunk_keys),
        (HashTableLayout::OneToMany, true)
    );
}

// A second build of the same key set is served from the result cache.
#[test]
fn repeated_build_hits_result_cache() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 2, 3]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let first = build_single_column(
        3,
        &fetcher,
        SqlType::Int,
        HashTableLayout::OneToOne,
        Arc::clone(&caches),
    )
    .unwrap();
    assert_eq!(caches.num_cached_tables(), 1);

    let second = build_single_column(
        3,
        &fetcher,
        SqlType::Int,
        HashTableLayout::OneToOne,
        Arc::clone(&caches),
    )
    .unwrap();
    assert_eq!(caches.num_cached_tables(), 1);
    assert!(Arc::ptr_eq(
        first.hash_table_for_device(0).unwrap(),
        second.hash_table_for_device(0).unwrap()
    ));
}

// Randomized probe round-trip over the supported key widths.
#[test]
fn randomized_probe_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for &sql_type in &[SqlType::SmallInt, SqlType::Int, SqlType::BigInt] {
        let num_rows = rng.gen_range(500..2_000);
        // Distinct values so the one-to-one layout holds.
        let mut values: Vec<i64> = (0..num_rows as i64)
            .map(|i| match sql_type {
                SqlType::SmallInt => i - 1_000,
                SqlType::Int => (i * 7) - 100_000,
                _ => (i << 33) - 5,
            })
            .collect();
        use rand::seq::SliceRandom;
        values.shuffle(&mut rng);

        let fetcher = match sql_type {
            SqlType::SmallInt => {
                let v: Vec<i16> = values.iter().map(|&x| x as i16).collect();
                VecFetcher::new().with_i16_column(1, &v)
            }
            SqlType::Int => {
                let v: Vec<i32> = values.iter().map(|&x| x as i32).collect();
                VecFetcher::new().with_i32_column(1, &v)
            }
            _ => VecFetcher::new().with_i64_column(1, &values),
        };
        let caches = Arc::new(JoinHashTableCaches::new());
        let table =
            build_single_column(num_rows, &fetcher, sql_type, HashTableLayout::OneToOne, caches)
                .unwrap();

        for (row, &value) in values.iter().enumerate() {
            assert_eq!(
                table.codegen_slot(&[value], 1, 0).unwrap(),
                row as i64,
                "width {sql_type:?} row {row}"
            );
        }
        // Values outside the inserted domain miss.
        assert_eq!(table.codegen_slot(&[i64::MAX >> 2], 1, 0).unwrap(), -1);
    }
}

// Randomized one-to-many round-trip: every bucket contains exactly the rows
// that carry its key.
#[test]
fn randomized_matching_set_roundtrip() {
    let mut rng = StdRng::seed_from_u64(42);
    let num_rows = 5_000;
    let values: Vec<i32> = (0..num_rows).map(|_| rng.gen_range(0..500)).collect();
    let fetcher = VecFetcher::new().with_i32_column(1, &values);
    let caches = Arc::new(JoinHashTableCaches::new());
    let table = build_single_column(
        num_rows,
        &fetcher,
        SqlType::Int,
        HashTableLayout::OneToMany,
        caches,
    )
    .unwrap();

    for probe in 0..500i32 {
        let expected: Vec<i32> = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == probe)
            .map(|(i, _)| i as i32)
            .collect();
        let mut got = table.codegen_matching_set(&[probe as i64], 1, 0).unwrap();
        got.sort_unstable();
        assert_eq!(got, expected, "bucket for {probe}");
    }
}

#[test]
fn too_many_hash_entries_rejected() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let condition = JoinCondition::new(JoinOperator::Eq, vec![int_pair(10, 1, SqlType::Int)]);
    let err = KeyedJoinHashTable::build(
        condition,
        single_fragment_info(i32::MAX as usize / 2 + 1),
        HashTableLayout::OneToOne,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap_err();
    assert!(matches!(err, Error::TooManyHashEntries(_)));
}

// Nulls never match under `=` but match themselves under `<=>`.
#[test]
fn null_semantics_follow_operator() {
    let null = i32::MIN;
    let values = [7, null, null];
    let caches = Arc::new(JoinHashTableCaches::new());
    let fetcher = VecFetcher::new().with_i32_column(1, &values);

    let eq_condition = JoinCondition::new(JoinOperator::Eq, vec![int_pair(10, 1, SqlType::Int)]);
    let eq_table = KeyedJoinHashTable::build(
        eq_condition,
        single_fragment_info(3),
        HashTableLayout::OneToMany,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        Arc::clone(&caches),
        &fetcher,
    )
    .unwrap();
    assert!(eq_table
        .codegen_matching_set(&[null as i64], 1, 0)
        .unwrap()
        .is_empty());

    let bw_condition = JoinCondition::new(JoinOperator::BwEq, vec![int_pair(10, 1, SqlType::Int)]);
    let bw_table = KeyedJoinHashTable::build(
        bw_condition,
        single_fragment_info(3),
        HashTableLayout::OneToMany,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap();
    let mut null_bucket = bw_table.codegen_matching_set(&[null as i64], 1, 0).unwrap();
    null_bucket.sort_unstable();
    assert_eq!(null_bucket, vec![1, 2]);
}

// Composite two-column keys: only full-key matches resolve.
#[test]
fn composite_key_build_and_probe() {
    let fetcher = VecFetcher::new()
        .with_i32_column(1, &[1, 1, 2])
        .with_i32_column(2, &[10, 20, 10]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let condition = JoinCondition::new(
        JoinOperator::Eq,
        vec![int_pair(10, 1, SqlType::Int), int_pair(10, 2, SqlType::Int)],
    );
    let table = KeyedJoinHashTable::build(
        condition,
        single_fragment_info(3),
        HashTableLayout::OneToOne,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap();
    assert_eq!(table.key_component_count(), 2);
    assert_eq!(table.codegen_slot(&[1, 20], 1, 0).unwrap(), 1);
    assert_eq!(table.codegen_slot(&[2, 20], 1, 0).unwrap(), -1);
}

// Dictionary translation: build keys land in the outer dictionary's id
// space, so outer ids probe directly.
#[test]
fn dictionary_translation_build() {
    let inner_dict = Arc::new(StringDictProxy::new(
        1,
        vec!["red".to_string(), "green".to_string(), "blue".to_string()],
    ));
    let outer_dict = Arc::new(StringDictProxy::new(
        2,
        vec!["blue".to_string(), "red".to_string()],
    ));
    let mut proxies = FxHashMap::default();
    proxies.insert(1, inner_dict);
    proxies.insert(2, outer_dict);

    let pair = InnerOuterPair {
        inner: ColumnRef::new(1, 10, 1, SqlType::Text)
            .with_rte_idx(1)
            .with_dict_id(1),
        outer: ColumnRef::new(1, 100, 1, SqlType::Text)
            .with_rte_idx(0)
            .with_dict_id(2),
    };
    // Rows hold inner-dictionary ids: red, green, blue.
    let fetcher = VecFetcher::new().with_i32_column(1, &[0, 1, 2]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let table = KeyedJoinHashTable::build(
        JoinCondition::new(JoinOperator::Eq, vec![pair]),
        single_fragment_info(3),
        HashTableLayout::OneToOne,
        &JoinHashTableConfig::default(),
        proxies,
        caches,
        &fetcher,
    )
    .unwrap();

    // Outer id 0 = "blue" (build row 2), outer id 1 = "red" (build row 0);
    // "green" is absent from the outer dictionary entirely.
    assert_eq!(table.codegen_slot(&[0], 1, 0).unwrap(), 2);
    assert_eq!(table.codegen_slot(&[1], 1, 0).unwrap(), 0);
}

#[test]
fn replication_constraint_in_cluster_mode() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 2]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let condition = JoinCondition::new(JoinOperator::Eq, vec![int_pair(10, 1, SqlType::Int)]);
    let config = JoinHashTableConfig {
        cluster_mode: true,
        inner_table_replicated: false,
        inner_table_name: "lineitem".to_string(),
        ..JoinHashTableConfig::default()
    };
    let err = KeyedJoinHashTable::build(
        condition,
        single_fragment_info(2),
        HashTableLayout::OneToOne,
        &config,
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap_err();
    assert!(matches!(err, Error::TableMustBeReplicated(name) if name == "lineitem"));
}

#[test]
fn virtual_column_join_rejected() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 2]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let mut pair = int_pair(10, 1, SqlType::Int);
    pair.inner.is_virtual = true;
    let condition = JoinCondition::new(JoinOperator::Eq, vec![pair]);
    let err = KeyedJoinHashTable::build(
        condition,
        single_fragment_info(2),
        HashTableLayout::OneToOne,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap_err();
    assert!(matches!(err, Error::HashJoinFail(_)));
}

// The uncovered self-join pattern is rejected at key materialisation with a
// user-visible error.
#[test]
fn uncovered_self_join_rejected() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[1, 2]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let pair = InnerOuterPair {
        inner: ColumnRef::new(1, 10, 1, SqlType::Int).with_rte_idx(0),
        outer: ColumnRef::new(1, 10, 2, SqlType::Int).with_rte_idx(2),
    };
    let condition = JoinCondition::new(JoinOperator::Eq, vec![pair]);
    let table = KeyedJoinHashTable::build(
        condition,
        single_fragment_info(2),
        HashTableLayout::OneToOne,
        &JoinHashTableConfig::default(),
        FxHashMap::default(),
        caches,
        &fetcher,
    )
    .unwrap();
    let err = table.codegen_key(&[1], 1).unwrap_err();
    assert!(err.to_string().contains("self-join"));
    // A tree covering the outer occurrence is fine.
    assert!(table.codegen_key(&[1], 2).is_ok());
}

// The decoded entry set matches what the probe functions see.
#[test]
fn entry_set_decode_matches_probes() {
    let fetcher = VecFetcher::new().with_i32_column(1, &[5, 6, 5]);
    let caches = Arc::new(JoinHashTableCaches::new());
    let table = build_single_column(
        3,
        &fetcher,
        SqlType::Int,
        HashTableLayout::OneToMany,
        caches,
    )
    .unwrap();
    let decoded = table.hash_table_for_device(0).unwrap().to_entry_set();
    let keys: Vec<Vec<i64>> = decoded.iter().map(|e| e.key.clone()).collect();
    assert!(keys.contains(&vec![5]));
    assert!(keys.contains(&vec![6]));
    for entry in decoded {
        let geometry = table.hash_table_for_device(0).unwrap().geometry();
        let key = build_probe_key(&entry.key, 4);
        let key_dict =
            &table.join_hash_buffer(0).unwrap()[..geometry.key_buffer_size()];
        let slot = get_composite_key_index_32(&key, 1, key_dict, table.entry_count() as i64);
        assert!(slot >= 0);
    }
}
