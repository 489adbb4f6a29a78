use crate::HashTableLayout;

/// Byte geometry of one hash table buffer.
///
/// The buffer is a single contiguous region with up to four sub-regions:
/// the key region (per entry: the key components, plus one trailing payload
/// slot for the one-to-one layout), then for multi-entry layouts the
/// offsets, counts, and row-id payload regions, each of 32-bit slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTableGeometry {
    pub layout: HashTableLayout,
    pub key_component_width: usize,
    pub key_component_count: usize,
    pub entry_count: usize,
    pub emitted_keys_count: usize,
}

impl HashTableGeometry {
    pub fn new(
        layout: HashTableLayout,
        key_component_width: usize,
        key_component_count: usize,
        entry_count: usize,
        emitted_keys_count: usize,
    ) -> Self {
        debug_assert!(key_component_width == 4 || key_component_width == 8);
        Self {
            layout,
            key_component_width,
            key_component_count,
            entry_count,
            emitted_keys_count,
        }
    }

    /// Bytes of one key-region entry.
    pub fn entry_size(&self) -> usize {
        let slots = self.key_component_count
            + usize::from(!self.layout.requires_additional_buffers());
        slots * self.key_component_width
    }

    pub fn key_buffer_size(&self) -> usize {
        self.entry_count * self.entry_size()
    }

    /// Bytes of the offsets region (and of the counts region).
    pub fn component_buffer_size(&self) -> usize {
        self.entry_count * std::mem::size_of::<i32>()
    }

    pub fn offset_buffer_off(&self) -> usize {
        self.key_buffer_size()
    }

    pub fn count_buffer_off(&self) -> usize {
        if self.layout.requires_additional_buffers() {
            self.offset_buffer_off() + self.component_buffer_size()
        } else {
            self.key_buffer_size()
        }
    }

    pub fn payload_buffer_off(&self) -> usize {
        if self.layout.requires_additional_buffers() {
            self.count_buffer_off() + self.component_buffer_size()
        } else {
            self.key_buffer_size()
        }
    }

    /// Total buffer size: the key region plus, for multi-entry layouts, the
    /// offsets and counts regions and one payload slot per emitted key.
    pub fn total_bytes(&self) -> usize {
        let one_to_many_slots = if self.layout.requires_additional_buffers() {
            2 * self.entry_count + self.emitted_keys_count
        } else {
            0
        };
        self.key_buffer_size() + one_to_many_slots * std::mem::size_of::<i32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_one_geometry_has_trailing_payload_slot() {
        let g = HashTableGeometry::new(HashTableLayout::OneToOne, 4, 2, 8, 0);
        assert_eq!(g.entry_size(), 12);
        assert_eq!(g.key_buffer_size(), 96);
        assert_eq!(g.offset_buffer_off(), 96);
        assert_eq!(g.count_buffer_off(), 96);
        assert_eq!(g.payload_buffer_off(), 96);
        assert_eq!(g.total_bytes(), 96);
    }

    #[test]
    fn one_to_many_geometry_appends_component_regions() {
        let g = HashTableGeometry::new(HashTableLayout::OneToMany, 8, 2, 10, 7);
        assert_eq!(g.entry_size(), 16);
        assert_eq!(g.key_buffer_size(), 160);
        assert_eq!(g.offset_buffer_off(), 160);
        assert_eq!(g.count_buffer_off(), 160 + 40);
        assert_eq!(g.payload_buffer_off(), 160 + 80);
        assert_eq!(g.total_bytes(), 160 + 40 + 40 + 28);
    }
}
