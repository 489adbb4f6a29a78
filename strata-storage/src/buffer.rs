use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use strata_result::{Error, Result};
use strata_types::{ChunkKey, ChunkMetadata};

/// Byte buffer holding one chunk, shared between the storage layer, the
/// foreign-storage managers, and the data wrappers.
///
/// Implementations differ in backing (page files vs. transient memory) but
/// expose the same contract: appended bytes, optional chunk metadata, and a
/// dirty flag that checkpointing clears.
pub trait ChunkBuffer: Send {
    /// Number of bytes currently held.
    fn size(&self) -> usize;

    /// Number of pages the data occupies; zero for metadata-only buffers.
    fn page_count(&self) -> usize;

    /// Drop data and metadata, keeping the buffer allocated.
    fn reset_to_empty(&mut self);

    fn append(&mut self, bytes: &[u8]);

    /// Copy the first `num_bytes` into `dst`.
    fn read(&self, dst: &mut [u8], num_bytes: usize) -> Result<()>;

    fn as_bytes(&self) -> &[u8];

    fn set_metadata(&mut self, metadata: ChunkMetadata);

    fn metadata(&self) -> Option<&ChunkMetadata>;

    /// Mark the buffer as updated so the next checkpoint persists it.
    fn set_updated(&mut self);

    fn is_dirty(&self) -> bool;

    fn clear_dirty(&mut self);

    /// Release the buffer's data pages, keeping metadata. Returns the number
    /// of pages released.
    fn free_chunk_pages(&mut self) -> usize;
}

/// Shared handle to a chunk buffer.
pub type ChunkBufferRef = Arc<Mutex<dyn ChunkBuffer>>;

/// Ordered buffer map passed to data wrappers for population.
pub type ChunkBufferMap = BTreeMap<ChunkKey, ChunkBufferRef>;

/// In-memory image of one page-backed chunk file.
pub struct FileBuffer {
    page_size: usize,
    data: Vec<u8>,
    metadata: Option<ChunkMetadata>,
    dirty: bool,
}

impl FileBuffer {
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0);
        Self {
            page_size,
            data: Vec::new(),
            metadata: None,
            dirty: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Replace the buffer contents wholesale.
    pub fn write_all(&mut self, bytes: &[u8], metadata: Option<ChunkMetadata>) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        if metadata.is_some() {
            self.metadata = metadata;
        }
        self.dirty = true;
    }
}

impl ChunkBuffer for FileBuffer {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn page_count(&self) -> usize {
        self.data.len().div_ceil(self.page_size)
    }

    fn reset_to_empty(&mut self) {
        self.data.clear();
        self.metadata = None;
        self.dirty = true;
    }

    fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.dirty = true;
    }

    fn read(&self, dst: &mut [u8], num_bytes: usize) -> Result<()> {
        if num_bytes > self.data.len() {
            return Err(Error::Internal(format!(
                "chunk buffer read of {} bytes exceeds buffer size {}",
                num_bytes,
                self.data.len()
            )));
        }
        dst[..num_bytes].copy_from_slice(&self.data[..num_bytes]);
        Ok(())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn set_metadata(&mut self, metadata: ChunkMetadata) {
        self.metadata = Some(metadata);
        self.dirty = true;
    }

    fn metadata(&self) -> Option<&ChunkMetadata> {
        self.metadata.as_ref()
    }

    fn set_updated(&mut self) {
        self.dirty = true;
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn free_chunk_pages(&mut self) -> usize {
        let pages = self.page_count();
        self.data.clear();
        self.dirty = true;
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{ChunkStats, SqlType};

    #[test]
    fn page_count_rounds_up() {
        let mut buf = FileBuffer::new(8);
        assert_eq!(buf.page_count(), 0);
        buf.append(&[0u8; 9]);
        assert_eq!(buf.page_count(), 2);
        buf.append(&[0u8; 7]);
        assert_eq!(buf.page_count(), 2);
    }

    #[test]
    fn free_pages_keeps_metadata() {
        let mut buf = FileBuffer::new(8);
        buf.append(&[1, 2, 3]);
        buf.set_metadata(ChunkMetadata::new(SqlType::Int, 3, 1, ChunkStats::default()));
        assert_eq!(buf.free_chunk_pages(), 1);
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.page_count(), 0);
        assert!(buf.metadata().is_some());
    }
}
