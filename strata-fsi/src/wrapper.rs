use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use strata_result::{Error, Result};
use strata_storage::ChunkBufferMap;
use strata_types::ChunkMetadataVector;

/// Per-format adapter producing chunk buffers and metadata from external
/// files.
///
/// All provided chunk buffers in one `populate_chunk_buffers` call belong to
/// the same fragment. `optional` buffers may be filled when the wrapper has
/// to scan through the data anyway (row-wise formats); `required` buffers
/// must always be filled.
pub trait ForeignDataWrapper: Send + Sync {
    /// Populate `out` with metadata for every chunk of the wrapped table.
    fn populate_chunk_metadata(&self, out: &mut ChunkMetadataVector) -> Result<()>;

    fn populate_chunk_buffers(
        &self,
        required: &ChunkBufferMap,
        optional: &ChunkBufferMap,
    ) -> Result<()>;

    /// Serialize recoverable internal state to `path` so a later process can
    /// reconstruct the wrapper without re-scanning files.
    fn serialize_data_wrapper_internals(&self, path: &Path) -> Result<()>;

    /// Restore internal state from a file written by
    /// [`ForeignDataWrapper::serialize_data_wrapper_internals`].
    fn restore_data_wrapper_internals(
        &self,
        path: &Path,
        chunk_metadata: &ChunkMetadataVector,
    ) -> Result<()>;

    /// True when this wrapper was restored from disk rather than built by a
    /// fresh scan.
    fn is_restored(&self) -> bool;
}

/// Fault-injecting decorator around a real data wrapper.
///
/// Installed over an existing wrapper via
/// [`crate::ForeignStorageMgr::set_data_wrapper`]; it delegates to its
/// parent unless a failure flag is set. The parent handle is a plain shared
/// reference; logical ownership stays with the manager's wrapper map.
#[derive(Default)]
pub struct MockForeignDataWrapper {
    parent: Mutex<Option<Arc<dyn ForeignDataWrapper>>>,
    fail_metadata_scans: AtomicBool,
    fail_buffer_population: AtomicBool,
}

impl MockForeignDataWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parent_wrapper(&self, parent: Arc<dyn ForeignDataWrapper>) {
        *self.parent.lock().expect("mock parent lock poisoned") = Some(parent);
    }

    pub fn set_fail_metadata_scans(&self, fail: bool) {
        self.fail_metadata_scans.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_buffer_population(&self, fail: bool) {
        self.fail_buffer_population.store(fail, Ordering::SeqCst);
    }

    fn parent(&self) -> Result<Arc<dyn ForeignDataWrapper>> {
        self.parent
            .lock()
            .expect("mock parent lock poisoned")
            .clone()
            .ok_or_else(|| Error::Internal("mock wrapper has no parent".to_string()))
    }
}

impl ForeignDataWrapper for MockForeignDataWrapper {
    fn populate_chunk_metadata(&self, out: &mut ChunkMetadataVector) -> Result<()> {
        if self.fail_metadata_scans.load(Ordering::SeqCst) {
            return Err(Error::Internal("foreign storage unreachable".to_string()));
        }
        self.parent()?.populate_chunk_metadata(out)
    }

    fn populate_chunk_buffers(
        &self,
        required: &ChunkBufferMap,
        optional: &ChunkBufferMap,
    ) -> Result<()> {
        if self.fail_buffer_population.load(Ordering::SeqCst) {
            return Err(Error::Internal("foreign storage unreachable".to_string()));
        }
        self.parent()?.populate_chunk_buffers(required, optional)
    }

    fn serialize_data_wrapper_internals(&self, path: &Path) -> Result<()> {
        self.parent()?.serialize_data_wrapper_internals(path)
    }

    fn restore_data_wrapper_internals(
        &self,
        path: &Path,
        chunk_metadata: &ChunkMetadataVector,
    ) -> Result<()> {
        self.parent()?
            .restore_data_wrapper_internals(path, chunk_metadata)
    }

    fn is_restored(&self) -> bool {
        self.parent().map(|p| p.is_restored()).unwrap_or(false)
    }
}
