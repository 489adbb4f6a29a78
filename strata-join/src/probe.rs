//! Probe-site runtime and the contract exported to the code generator.
//!
//! Build and probe share one probe sequence: the packed key bytes hash
//! through `FxHasher` and the table is scanned with linear probing from
//! `hash % entry_count`. The four `baseline_hash_join_idx_*` /
//! `get_composite_key_index_*` functions are the symbols an external code
//! generator splices into the query's probe loop.

use std::hash::Hasher;

use rustc_hash::FxHasher;
use strata_result::{Error, Result};

use crate::columns::ColumnRef;

/// Key slot sentinel for 32-bit components.
pub(crate) const SENTINEL_32: [u8; 4] = (-1i32).to_le_bytes();
/// Key slot sentinel for 64-bit components.
pub(crate) const SENTINEL_64: [u8; 8] = i64::MIN.to_le_bytes();

/// Probe miss marker returned by the runtime functions.
pub const PROBE_MISS: i64 = -1;

/// Deterministic hash of packed composite-key bytes; identical on the build
/// and probe side.
pub fn hash_composite_key(key_bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key_bytes);
    hasher.finish()
}

/// Pack `values` into a contiguous key buffer, sign-extending (or
/// truncating) every component to `key_component_width` bytes.
pub fn build_probe_key(values: &[i64], key_component_width: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(values.len() * key_component_width);
    for &value in values {
        match key_component_width {
            4 => key.extend_from_slice(&(value as i32).to_le_bytes()),
            8 => key.extend_from_slice(&value.to_le_bytes()),
            other => panic!("unsupported key component width {other}"),
        }
    }
    key
}

pub(crate) fn is_empty_entry(entry_key: &[u8], key_component_width: usize) -> bool {
    match key_component_width {
        4 => entry_key.chunks_exact(4).all(|c| c == SENTINEL_32),
        8 => entry_key.chunks_exact(8).all(|c| c == SENTINEL_64),
        other => panic!("unsupported key component width {other}"),
    }
}

pub(crate) fn read_i32(buf: &[u8], byte_off: usize) -> i32 {
    i32::from_le_bytes(buf[byte_off..byte_off + 4].try_into().expect("slice len"))
}

pub(crate) fn write_i32(buf: &mut [u8], byte_off: usize, value: i32) {
    buf[byte_off..byte_off + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_i64(buf: &[u8], byte_off: usize) -> i64 {
    i64::from_le_bytes(buf[byte_off..byte_off + 8].try_into().expect("slice len"))
}

fn baseline_hash_join_idx(
    hash_buf: &[u8],
    key: &[u8],
    key_bytes: i64,
    entry_count: i64,
    key_component_width: usize,
) -> i64 {
    debug_assert_eq!(key.len(), key_bytes as usize);
    if entry_count <= 0 {
        return PROBE_MISS;
    }
    let entry_count = entry_count as usize;
    let stride = key.len() + key_component_width;
    let start = (hash_composite_key(key) % entry_count as u64) as usize;
    for probe in 0..entry_count {
        let slot = (start + probe) % entry_count;
        let off = slot * stride;
        let entry_key = &hash_buf[off..off + key.len()];
        if entry_key == key {
            let payload_off = off + key.len();
            return match key_component_width {
                4 => read_i32(hash_buf, payload_off) as i64,
                _ => read_i64(hash_buf, payload_off),
            };
        }
        if is_empty_entry(entry_key, key_component_width) {
            return PROBE_MISS;
        }
    }
    PROBE_MISS
}

/// Probe a one-to-one table with 32-bit key components. Returns the payload
/// of the matching slot, or the miss sentinel.
pub fn baseline_hash_join_idx_32(
    hash_buf: &[u8],
    key: &[u8],
    key_bytes: i64,
    entry_count: i64,
) -> i64 {
    baseline_hash_join_idx(hash_buf, key, key_bytes, entry_count, 4)
}

/// Probe a one-to-one table with 64-bit key components.
pub fn baseline_hash_join_idx_64(
    hash_buf: &[u8],
    key: &[u8],
    key_bytes: i64,
    entry_count: i64,
) -> i64 {
    baseline_hash_join_idx(hash_buf, key, key_bytes, entry_count, 8)
}

fn get_composite_key_index(
    key: &[u8],
    key_component_count: i64,
    key_dict: &[u8],
    entry_count: i64,
    key_component_width: usize,
) -> i64 {
    debug_assert_eq!(key.len(), key_component_count as usize * key_component_width);
    if entry_count <= 0 {
        return PROBE_MISS;
    }
    let entry_count = entry_count as usize;
    let stride = key.len();
    let start = (hash_composite_key(key) % entry_count as u64) as usize;
    for probe in 0..entry_count {
        let slot = (start + probe) % entry_count;
        let off = slot * stride;
        let entry_key = &key_dict[off..off + key.len()];
        if entry_key == key {
            return slot as i64;
        }
        if is_empty_entry(entry_key, key_component_width) {
            return PROBE_MISS;
        }
    }
    PROBE_MISS
}

/// Find the key-dictionary slot of a composite key in a multi-entry table
/// with 32-bit components. Returns the slot index or the miss sentinel.
pub fn get_composite_key_index_32(
    key: &[u8],
    key_component_count: i64,
    key_dict: &[u8],
    entry_count: i64,
) -> i64 {
    get_composite_key_index(key, key_component_count, key_dict, entry_count, 4)
}

/// Find the key-dictionary slot of a composite key in a multi-entry table
/// with 64-bit components.
pub fn get_composite_key_index_64(
    key: &[u8],
    key_component_count: i64,
    key_dict: &[u8],
    entry_count: i64,
) -> i64 {
    get_composite_key_index(key, key_component_count, key_dict, entry_count, 8)
}

/// True for the self-join pattern where the outer column references a table
/// occurrence that the left-deep join tree under construction does not
/// cover. Such plans would need multiple left-deep trees and are rejected.
pub fn self_join_not_covered_by_left_deep_tree(
    outer: &ColumnRef,
    inner: &ColumnRef,
    max_rte_covered: i32,
) -> bool {
    outer.table_id == inner.table_id
        && outer.rte_idx != inner.rte_idx
        && outer.rte_idx > max_rte_covered
}

pub(crate) fn self_join_rejection() -> Error {
    Error::HashJoinFail(
        "Query execution fails because the query contains not supported self-join pattern. \
         We suspect the query requires multiple left-deep join tree due to the join condition \
         of the self-join and is not supported for now. Please consider rewriting table order \
         in FROM clause."
            .to_string(),
    )
}

/// Everything an external code generator needs to splice one probe-site call
/// into the query's probe loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSiteContract {
    /// Runtime symbol to call, e.g. `baseline_hash_join_idx_32`.
    pub symbol: String,
    pub key_component_width: usize,
    pub key_component_count: usize,
    pub entry_count: usize,
    /// Byte offset of the offsets region; also the size of the key region.
    pub key_buffer_size: usize,
    /// Byte size of the offsets region (and of the counts region).
    pub component_buffer_size: usize,
}

impl ProbeSiteContract {
    /// Width of the stack-allocated key buffer the generated code must
    /// materialise before the call.
    pub fn key_size_bytes(&self) -> usize {
        self.key_component_count * self.key_component_width
    }
}

/// Iterate a matching set: the payload row ids of one key-dictionary slot.
pub fn matching_set_for_slot<'a>(
    hash_buf: &'a [u8],
    slot: i64,
    offset_buffer_off: usize,
    count_buffer_off: usize,
    payload_buffer_off: usize,
) -> Result<&'a [u8]> {
    if slot < 0 {
        return Ok(&[]);
    }
    let slot = slot as usize;
    let offset = read_i32(hash_buf, offset_buffer_off + slot * 4);
    let count = read_i32(hash_buf, count_buffer_off + slot * 4);
    if offset < 0 || count <= 0 {
        return Ok(&[]);
    }
    let begin = payload_buffer_off + offset as usize * 4;
    let end = begin + count as usize * 4;
    if end > hash_buf.len() {
        return Err(Error::Internal(
            "matching set extends past the hash buffer".to_string(),
        ));
    }
    Ok(&hash_buf[begin..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::SqlType;

    #[test]
    fn probe_key_packs_and_truncates() {
        let key = build_probe_key(&[-1, 300], 4);
        assert_eq!(key.len(), 8);
        assert_eq!(&key[..4], (-1i32).to_le_bytes());
        assert_eq!(&key[4..], 300i32.to_le_bytes());
        let key = build_probe_key(&[-1], 8);
        assert_eq!(key, (-1i64).to_le_bytes());
    }

    #[test]
    fn empty_entry_detection() {
        let empty32 = [SENTINEL_32, SENTINEL_32].concat();
        assert!(is_empty_entry(&empty32, 4));
        let mut occupied = empty32.clone();
        occupied[0] = 0;
        assert!(!is_empty_entry(&occupied, 4));
        assert!(is_empty_entry(&SENTINEL_64, 8));
    }

    #[test]
    fn probe_of_empty_table_misses() {
        let geometry_bytes = vec![0xffu8; 8 * 3];
        let key = build_probe_key(&[42], 4);
        assert_eq!(baseline_hash_join_idx_32(&geometry_bytes, &key, 4, 3), -1);
    }

    #[test]
    fn self_join_coverage_check() {
        let inner = ColumnRef::new(1, 10, 1, SqlType::Int).with_rte_idx(0);
        let covered_outer = ColumnRef::new(1, 10, 2, SqlType::Int).with_rte_idx(1);
        assert!(self_join_not_covered_by_left_deep_tree(&covered_outer, &inner, 0));
        assert!(!self_join_not_covered_by_left_deep_tree(
            &covered_outer,
            &inner,
            1
        ));
        let other_table = ColumnRef::new(1, 11, 2, SqlType::Int).with_rte_idx(3);
        assert!(!self_join_not_covered_by_left_deep_tree(
            &other_table,
            &inner,
            0
        ));
    }
}
