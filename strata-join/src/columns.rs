//! Join column fetch seam, dictionary proxies, and the generic key handler.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use strata_result::{Error, Result};
use strata_types::{ChunkKey, SqlType};

use crate::JoinOperator;

/// Reference to a column participating in a join predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub db_id: i32,
    pub table_id: i32,
    pub column_id: i32,
    pub sql_type: SqlType,
    /// Range-table-entry index of the column's occurrence in the query.
    pub rte_idx: i32,
    /// Virtual columns (rowid) cannot be joined on.
    pub is_virtual: bool,
    /// Dictionary id for dictionary-encoded text columns.
    pub dict_id: Option<i32>,
    /// Array-typed outer columns force a many-to-many layout for overlaps.
    pub is_array: bool,
}

impl ColumnRef {
    pub fn new(db_id: i32, table_id: i32, column_id: i32, sql_type: SqlType) -> Self {
        Self {
            db_id,
            table_id,
            column_id,
            sql_type,
            rte_idx: 0,
            is_virtual: false,
            dict_id: None,
            is_array: false,
        }
    }

    pub fn with_rte_idx(mut self, rte_idx: i32) -> Self {
        self.rte_idx = rte_idx;
        self
    }

    pub fn with_dict_id(mut self, dict_id: i32) -> Self {
        self.dict_id = Some(dict_id);
        self
    }
}

/// One equi-predicate of the join condition: `inner = outer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerOuterPair {
    pub inner: ColumnRef,
    pub outer: ColumnRef,
}

/// One horizontal shard of the inner table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentInfo {
    pub fragment_id: i32,
    pub shard_id: i32,
    pub num_tuples: usize,
}

/// Fragment-level view of the inner table for this query.
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    pub fragments: Vec<FragmentInfo>,
    /// Non-zero when the inner table is sharded on the join key.
    pub shard_count: usize,
}

impl QueryInfo {
    pub fn num_tuples_upper_bound(&self) -> usize {
        self.fragments.iter().map(|f| f.num_tuples).sum()
    }
}

/// Dense array of inner-column values fetched for one device.
#[derive(Debug, Clone)]
pub struct JoinColumn {
    bytes: Arc<Vec<u8>>,
    pub num_elems: usize,
}

impl JoinColumn {
    pub fn from_bytes(bytes: Vec<u8>, num_elems: usize) -> Self {
        Self {
            bytes: Arc::new(bytes),
            num_elems,
        }
    }

    pub fn from_i16_values(values: &[i16]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self::from_bytes(bytes, values.len())
    }

    pub fn from_i32_values(values: &[i32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self::from_bytes(bytes, values.len())
    }

    pub fn from_i64_values(values: &[i64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self::from_bytes(bytes, values.len())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Width, null encoding, and comparison mode of one join column.
#[derive(Debug, Clone, Copy)]
pub struct JoinColumnTypeInfo {
    pub elem_size: usize,
    pub null_val: i64,
    pub uses_bw_eq: bool,
}

/// Read element `row` of a join column, sign-extended to `i64`.
pub fn join_column_value(column: &JoinColumn, type_info: &JoinColumnTypeInfo, row: usize) -> i64 {
    let bytes = column.bytes();
    let off = row * type_info.elem_size;
    match type_info.elem_size {
        1 => bytes[off] as i8 as i64,
        2 => i16::from_le_bytes(bytes[off..off + 2].try_into().expect("slice len")) as i64,
        4 => i32::from_le_bytes(bytes[off..off + 4].try_into().expect("slice len")) as i64,
        8 => i64::from_le_bytes(bytes[off..off + 8].try_into().expect("slice len")),
        other => panic!("unsupported join column width {other}"),
    }
}

/// Id/string mapping for one dictionary-encoded column, with the generation
/// counter that keys cache invariance.
#[derive(Debug)]
pub struct StringDictProxy {
    dict_id: i32,
    generation: i64,
    strings: Vec<String>,
    ids: FxHashMap<String, i32>,
}

impl StringDictProxy {
    pub fn new(dict_id: i32, strings: Vec<String>) -> Self {
        let generation = strings.len() as i64;
        let ids = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as i32))
            .collect();
        Self {
            dict_id,
            generation,
            strings,
            ids,
        }
    }

    pub fn dict_id(&self) -> i32 {
        self.dict_id
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn get_string(&self, id: i32) -> Option<&str> {
        self.strings.get(usize::try_from(id).ok()?).map(String::as_str)
    }

    pub fn get_id_of_string(&self, s: &str) -> Option<i32> {
        self.ids.get(s).copied()
    }
}

/// Per-pair dictionary proxies plus the chunk keys (with dictionary
/// generations) that identify the build input for caching.
#[derive(Debug, Clone, Default)]
pub struct CompositeKeyInfo {
    pub inner_proxies: Vec<Option<Arc<StringDictProxy>>>,
    pub outer_proxies: Vec<Option<Arc<StringDictProxy>>>,
    pub cache_key_chunks: Vec<ChunkKey>,
}

/// Supplies fetched join columns for the build side; the column fetching
/// machinery itself is an external collaborator.
pub trait JoinColumnFetcher: Send + Sync {
    fn fetch_join_column(
        &self,
        column: &ColumnRef,
        fragments: &[FragmentInfo],
        device_id: usize,
    ) -> Result<JoinColumn>;
}

/// Fetched join columns and their type descriptors for one device.
#[derive(Debug, Clone)]
pub struct ColumnsForDevice {
    pub join_columns: Vec<JoinColumn>,
    pub join_column_types: Vec<JoinColumnTypeInfo>,
}

/// Materialises the composite key of one input row, folding in null
/// semantics and dictionary translation.
///
/// When the inner and outer encodings of a pair differ, inner ids translate
/// through the strings into the outer dictionary so probe-side values match
/// directly; rows whose string is absent on the outer side can never match
/// and are skipped.
pub struct GenericKeyHandler<'a> {
    join_columns: &'a [JoinColumn],
    join_column_types: &'a [JoinColumnTypeInfo],
    inner_proxies: &'a [Option<Arc<StringDictProxy>>],
    outer_proxies: &'a [Option<Arc<StringDictProxy>>],
}

impl<'a> GenericKeyHandler<'a> {
    pub fn new(
        join_columns: &'a [JoinColumn],
        join_column_types: &'a [JoinColumnTypeInfo],
        inner_proxies: &'a [Option<Arc<StringDictProxy>>],
        outer_proxies: &'a [Option<Arc<StringDictProxy>>],
    ) -> Self {
        debug_assert_eq!(join_columns.len(), join_column_types.len());
        Self {
            join_columns,
            join_column_types,
            inner_proxies,
            outer_proxies,
        }
    }

    pub fn key_component_count(&self) -> usize {
        self.join_columns.len()
    }

    pub fn num_elems(&self) -> usize {
        self.join_columns.first().map(|c| c.num_elems).unwrap_or(0)
    }

    /// Fill `out` with the composite key of `row`. Returns `Ok(false)` when
    /// the row cannot participate in any match and must be skipped.
    pub fn key_for_row(&self, row: usize, out: &mut [i64]) -> Result<bool> {
        debug_assert_eq!(out.len(), self.join_columns.len());
        for (i, (column, type_info)) in self
            .join_columns
            .iter()
            .zip(self.join_column_types)
            .enumerate()
        {
            let value = join_column_value(column, type_info, row);
            if value == type_info.null_val {
                if !type_info.uses_bw_eq {
                    return Ok(false);
                }
                out[i] = value;
                continue;
            }
            let translated = match (
                self.inner_proxies.get(i).and_then(Option::as_ref),
                self.outer_proxies.get(i).and_then(Option::as_ref),
            ) {
                (Some(inner), Some(outer)) => {
                    let id = i32::try_from(value).map_err(|_| {
                        Error::Internal(format!("dictionary id {value} out of range"))
                    })?;
                    let string = inner.get_string(id).ok_or_else(|| {
                        Error::Internal(format!("id {id} missing from inner dictionary"))
                    })?;
                    match outer.get_id_of_string(string) {
                        Some(outer_id) => outer_id as i64,
                        None => return Ok(false),
                    }
                }
                _ => value,
            };
            out[i] = translated;
        }
        Ok(true)
    }
}
