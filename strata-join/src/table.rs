use std::collections::BTreeSet;

use crate::layout::HashTableGeometry;
use crate::probe::{is_empty_entry, read_i32, read_i64};
use crate::HashTableLayout;

/// One owned hash-table buffer for one device, addressable through the
/// sub-region offsets of its [`HashTableGeometry`].
#[derive(Debug)]
pub struct CompositeHashTable {
    geometry: HashTableGeometry,
    cpu_buffer: Vec<u8>,
    device_id: usize,
    #[cfg(feature = "gpu")]
    gpu_buffer: Option<crate::device::DeviceBuffer>,
}

impl CompositeHashTable {
    pub(crate) fn from_cpu_buffer(
        geometry: HashTableGeometry,
        cpu_buffer: Vec<u8>,
        device_id: usize,
    ) -> Self {
        debug_assert_eq!(cpu_buffer.len(), geometry.total_bytes());
        Self {
            geometry,
            cpu_buffer,
            device_id,
            #[cfg(feature = "gpu")]
            gpu_buffer: None,
        }
    }

    pub fn geometry(&self) -> &HashTableGeometry {
        &self.geometry
    }

    pub fn layout(&self) -> HashTableLayout {
        self.geometry.layout
    }

    pub fn entry_count(&self) -> usize {
        self.geometry.entry_count
    }

    pub fn emitted_keys_count(&self) -> usize {
        self.geometry.emitted_keys_count
    }

    pub fn cpu_buffer(&self) -> &[u8] {
        &self.cpu_buffer
    }

    pub fn buffer_size(&self) -> usize {
        self.cpu_buffer.len()
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    #[cfg(feature = "gpu")]
    pub fn gpu_buffer(&self) -> Option<&crate::device::DeviceBuffer> {
        self.gpu_buffer.as_ref()
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn set_gpu_buffer(&mut self, buffer: crate::device::DeviceBuffer) {
        self.gpu_buffer = Some(buffer);
    }

    /// Decode the buffer into a set of `(key, payload row ids)` entries for
    /// inspection and tests. Payloads are sorted; bucket order within a key
    /// is not meaningful.
    pub fn to_entry_set(&self) -> BTreeSet<DecodedJoinEntry> {
        let g = &self.geometry;
        let buf = &self.cpu_buffer;
        let mut entries = BTreeSet::new();
        let stride = g.entry_size();
        let key_len = g.key_component_count * g.key_component_width;
        for slot in 0..g.entry_count {
            let off = slot * stride;
            let entry_key = &buf[off..off + key_len];
            if is_empty_entry(entry_key, g.key_component_width) {
                continue;
            }
            let key: Vec<i64> = (0..g.key_component_count)
                .map(|i| match g.key_component_width {
                    4 => read_i32(buf, off + i * 4) as i64,
                    _ => read_i64(buf, off + i * 8),
                })
                .collect();
            let mut payload = if g.layout.requires_additional_buffers() {
                let offset = read_i32(buf, g.offset_buffer_off() + slot * 4);
                let count = read_i32(buf, g.count_buffer_off() + slot * 4);
                if offset < 0 || count <= 0 {
                    Vec::new()
                } else {
                    (0..count as usize)
                        .map(|i| {
                            read_i32(buf, g.payload_buffer_off() + (offset as usize + i) * 4)
                        })
                        .collect()
                }
            } else {
                let payload_off = off + key_len;
                vec![match g.key_component_width {
                    4 => read_i32(buf, payload_off),
                    _ => read_i64(buf, payload_off) as i32,
                }]
            };
            payload.sort_unstable();
            entries.insert(DecodedJoinEntry { key, payload });
        }
        entries
    }
}

/// One decoded hash table entry: the composite key and the row ids mapped to
/// it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DecodedJoinEntry {
    pub key: Vec<i64>,
    pub payload: Vec<i32>,
}
