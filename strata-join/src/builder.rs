//! CPU hash table construction.
//!
//! One-to-one tables fill with open addressing and linear probing; a
//! duplicate composite key is a build failure that the orchestrator turns
//! into a layout downgrade. Multi-entry tables build the key dictionary
//! first, then count, prefix-sum, and scatter row ids into the payload
//! region.

use rayon::prelude::*;
use strata_result::{Error, Result};

use crate::columns::GenericKeyHandler;
use crate::layout::HashTableGeometry;
use crate::probe::{
    build_probe_key, hash_composite_key, is_empty_entry, read_i32, write_i32, SENTINEL_32,
    SENTINEL_64,
};
use crate::table::CompositeHashTable;

/// Builds one hash table buffer for one device.
pub struct HashTableBuilder;

impl HashTableBuilder {
    /// Build a table on the CPU for the given geometry, probing the key
    /// handler for every input row.
    pub fn build_on_cpu(
        key_handler: &GenericKeyHandler<'_>,
        geometry: HashTableGeometry,
        num_rows: usize,
        device_id: usize,
    ) -> Result<CompositeHashTable> {
        let total_bytes = geometry.total_bytes();
        // Entries must stay addressable through 32-bit slot arithmetic on
        // every device tier.
        if total_bytes > i32::MAX as usize {
            return Err(Error::TooManyHashEntries(
                "hash tables requiring larger than 2GB contiguous memory are not supported"
                    .to_string(),
            ));
        }
        tracing::debug!(
            entries = geometry.entry_count,
            bytes = total_bytes,
            layout = %geometry.layout,
            "initializing join hash table"
        );

        let mut buffer = vec![0u8; total_bytes];
        init_buffer(&mut buffer, &geometry);

        if geometry.layout.requires_additional_buffers() {
            fill_one_to_many(&mut buffer, &geometry, key_handler, num_rows)?;
        } else {
            fill_one_to_one(&mut buffer, &geometry, key_handler, num_rows)?;
        }
        Ok(CompositeHashTable::from_cpu_buffer(geometry, buffer, device_id))
    }
}

/// Write empty-slot sentinels into every region.
fn init_buffer(buffer: &mut [u8], geometry: &HashTableGeometry) {
    let entry_size = geometry.entry_size();
    let key_buffer_size = geometry.key_buffer_size();
    let (key_region, rest) = buffer.split_at_mut(key_buffer_size);

    let sentinel: &[u8] = match geometry.key_component_width {
        4 => &SENTINEL_32,
        _ => &SENTINEL_64,
    };
    key_region
        .par_chunks_mut(entry_size)
        .for_each(|entry| {
            for component in entry.chunks_mut(geometry.key_component_width) {
                component.copy_from_slice(sentinel);
            }
        });
    // Offsets, counts, and payload are 32-bit slots, all initialised to -1.
    rest.par_chunks_mut(4096).for_each(|chunk| chunk.fill(0xff));
}

fn fill_one_to_one(
    buffer: &mut [u8],
    geometry: &HashTableGeometry,
    key_handler: &GenericKeyHandler<'_>,
    num_rows: usize,
) -> Result<()> {
    let width = geometry.key_component_width;
    let stride = geometry.entry_size();
    let key_len = geometry.key_component_count * width;
    let entry_count = geometry.entry_count;
    let mut components = vec![0i64; geometry.key_component_count];

    for row in 0..num_rows {
        if !key_handler.key_for_row(row, &mut components)? {
            continue;
        }
        let key = build_probe_key(&components, width);
        let start = (hash_composite_key(&key) % entry_count as u64) as usize;
        let mut inserted = false;
        for probe in 0..entry_count {
            let slot = (start + probe) % entry_count;
            let off = slot * stride;
            if is_empty_entry(&buffer[off..off + key_len], width) {
                buffer[off..off + key_len].copy_from_slice(&key);
                let payload_off = off + key_len;
                match width {
                    4 => write_i32(buffer, payload_off, row as i32),
                    _ => buffer[payload_off..payload_off + 8]
                        .copy_from_slice(&(row as i64).to_le_bytes()),
                }
                inserted = true;
                break;
            }
            if buffer[off..off + key_len] == key[..] {
                return Err(Error::HashJoinFail(
                    "duplicate composite key in one-to-one hash table".to_string(),
                ));
            }
        }
        if !inserted {
            return Err(Error::HashJoinFail(
                "one-to-one hash table ran out of slots".to_string(),
            ));
        }
    }
    Ok(())
}

fn fill_one_to_many(
    buffer: &mut [u8],
    geometry: &HashTableGeometry,
    key_handler: &GenericKeyHandler<'_>,
    num_rows: usize,
) -> Result<()> {
    let width = geometry.key_component_width;
    let key_len = geometry.key_component_count * width;
    let stride = geometry.entry_size();
    debug_assert_eq!(stride, key_len);
    let entry_count = geometry.entry_count;
    let mut components = vec![0i64; geometry.key_component_count];

    // Pass one: deduplicate keys into the key dictionary, remembering each
    // row's slot.
    let mut row_slots: Vec<i32> = vec![-1; num_rows];
    for (row, row_slot) in row_slots.iter_mut().enumerate() {
        if !key_handler.key_for_row(row, &mut components)? {
            continue;
        }
        let key = build_probe_key(&components, width);
        let start = (hash_composite_key(&key) % entry_count as u64) as usize;
        let mut assigned = None;
        for probe in 0..entry_count {
            let slot = (start + probe) % entry_count;
            let off = slot * stride;
            if buffer[off..off + key_len] == key[..] {
                assigned = Some(slot);
                break;
            }
            if is_empty_entry(&buffer[off..off + key_len], width) {
                buffer[off..off + key_len].copy_from_slice(&key);
                assigned = Some(slot);
                break;
            }
        }
        match assigned {
            Some(slot) => *row_slot = slot as i32,
            None => {
                return Err(Error::HashJoinFail(
                    "one-to-many key dictionary ran out of slots".to_string(),
                ))
            }
        }
    }

    // Pass two: bucket sizes, exclusive prefix offsets, then scatter.
    let mut counts = vec![0i32; entry_count];
    for &slot in &row_slots {
        if slot >= 0 {
            counts[slot as usize] += 1;
        }
    }
    let offset_off = geometry.offset_buffer_off();
    let count_off = geometry.count_buffer_off();
    let payload_off = geometry.payload_buffer_off();
    let mut running = 0i32;
    let mut cursors = vec![0i32; entry_count];
    for slot in 0..entry_count {
        if counts[slot] > 0 {
            write_i32(buffer, offset_off + slot * 4, running);
            cursors[slot] = running;
            running += counts[slot];
        }
        write_i32(buffer, count_off + slot * 4, counts[slot]);
    }
    for (row, &slot) in row_slots.iter().enumerate() {
        if slot < 0 {
            continue;
        }
        let cursor = &mut cursors[slot as usize];
        write_i32(buffer, payload_off + (*cursor as usize) * 4, row as i32);
        *cursor += 1;
    }
    debug_assert!(running as usize <= geometry.emitted_keys_count);
    Ok(())
}

/// Bucket contents for a slot of a multi-entry table; test and inspection
/// helper mirroring the generated matching-set iteration.
pub(crate) fn bucket_for_slot(table: &CompositeHashTable, slot: i64) -> Vec<i32> {
    let g = table.geometry();
    if slot < 0 {
        return Vec::new();
    }
    let buf = table.cpu_buffer();
    let offset = read_i32(buf, g.offset_buffer_off() + slot as usize * 4);
    let count = read_i32(buf, g.count_buffer_off() + slot as usize * 4);
    if offset < 0 || count <= 0 {
        return Vec::new();
    }
    (0..count as usize)
        .map(|i| read_i32(buf, g.payload_buffer_off() + (offset as usize + i) * 4))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{JoinColumn, JoinColumnTypeInfo};
    use crate::probe::{baseline_hash_join_idx_32, get_composite_key_index_32};
    use crate::HashTableLayout;

    fn int_type() -> JoinColumnTypeInfo {
        JoinColumnTypeInfo {
            elem_size: 4,
            null_val: i32::MIN as i64,
            uses_bw_eq: false,
        }
    }

    #[test]
    fn one_to_one_build_and_probe() {
        let columns = [JoinColumn::from_i32_values(&[1, 2, 3, 4])];
        let types = [int_type()];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let geometry = HashTableGeometry::new(HashTableLayout::OneToOne, 4, 1, 8, 0);
        let table = HashTableBuilder::build_on_cpu(&handler, geometry, 4, 0).unwrap();

        let probe = |v: i64| {
            let key = build_probe_key(&[v], 4);
            baseline_hash_join_idx_32(table.cpu_buffer(), &key, 4, 8)
        };
        assert_eq!(probe(3), 2);
        assert_eq!(probe(1), 0);
        assert_eq!(probe(5), -1);
    }

    #[test]
    fn duplicate_key_fails_one_to_one() {
        let columns = [JoinColumn::from_i32_values(&[1, 1, 2])];
        let types = [int_type()];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let geometry = HashTableGeometry::new(HashTableLayout::OneToOne, 4, 1, 8, 0);
        let err = HashTableBuilder::build_on_cpu(&handler, geometry, 3, 0).unwrap_err();
        assert!(matches!(err, Error::HashJoinFail(_)));
    }

    #[test]
    fn one_to_many_buckets_hold_all_rows() {
        let columns = [JoinColumn::from_i32_values(&[1, 1, 2])];
        let types = [int_type()];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let geometry = HashTableGeometry::new(HashTableLayout::OneToMany, 4, 1, 4, 3);
        let table = HashTableBuilder::build_on_cpu(&handler, geometry, 3, 0).unwrap();

        let slot_of = |v: i64| {
            let key = build_probe_key(&[v], 4);
            get_composite_key_index_32(&key, 1, &table.cpu_buffer()[..geometry.key_buffer_size()], 4)
        };
        let mut bucket_one = bucket_for_slot(&table, slot_of(1));
        bucket_one.sort_unstable();
        assert_eq!(bucket_one, vec![0, 1]);
        assert_eq!(bucket_for_slot(&table, slot_of(2)), vec![2]);
        assert_eq!(slot_of(9), -1);
    }

    #[test]
    fn composite_keys_use_all_components() {
        let columns = [
            JoinColumn::from_i32_values(&[1, 1, 2]),
            JoinColumn::from_i32_values(&[10, 20, 10]),
        ];
        let types = [int_type(), int_type()];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let geometry = HashTableGeometry::new(HashTableLayout::OneToOne, 4, 2, 8, 0);
        let table = HashTableBuilder::build_on_cpu(&handler, geometry, 3, 0).unwrap();
        let probe = |a: i64, b: i64| {
            let key = build_probe_key(&[a, b], 4);
            baseline_hash_join_idx_32(table.cpu_buffer(), &key, 8, 8)
        };
        assert_eq!(probe(1, 10), 0);
        assert_eq!(probe(1, 20), 1);
        assert_eq!(probe(2, 10), 2);
        assert_eq!(probe(2, 20), -1);
    }

    #[test]
    fn wide_components_build_and_probe() {
        let columns = [JoinColumn::from_i64_values(&[1 << 40, -5, 0])];
        let types = [JoinColumnTypeInfo {
            elem_size: 8,
            null_val: i64::MIN,
            uses_bw_eq: false,
        }];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let geometry = HashTableGeometry::new(HashTableLayout::OneToOne, 8, 1, 6, 0);
        let table = HashTableBuilder::build_on_cpu(&handler, geometry, 3, 0).unwrap();
        let probe = |v: i64| {
            let key = build_probe_key(&[v], 8);
            crate::probe::baseline_hash_join_idx_64(table.cpu_buffer(), &key, 8, 6)
        };
        assert_eq!(probe(1 << 40), 0);
        assert_eq!(probe(-5), 1);
        assert_eq!(probe(7), -1);
    }
}
