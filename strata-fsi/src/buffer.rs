use strata_result::{Error, Result};
use strata_storage::ChunkBuffer;
use strata_types::ChunkMetadata;

/// Transient in-memory chunk buffer used for sibling chunks fetched through
/// the uncached manager. Never page-backed, so it reports zero pages.
#[derive(Default)]
pub struct ForeignStorageBuffer {
    data: Vec<u8>,
    metadata: Option<ChunkMetadata>,
    dirty: bool,
}

impl ForeignStorageBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkBuffer for ForeignStorageBuffer {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn page_count(&self) -> usize {
        0
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
                "buffer read of {} bytes exceeds buffer size {}",
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
        self.data.clear();
        0
    }
}
