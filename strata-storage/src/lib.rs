//! Page-backed chunk storage.
//!
//! [`ChunkFileMgr`] maps a [`strata_types::ChunkKey`] to a page-granular
//! buffer persisted under a per-table directory. `checkpoint` is the only
//! persistence fence: buffers accumulate writes in memory and hit disk as
//! page-aligned files plus a binary manifest when a checkpoint runs.

#![forbid(unsafe_code)]

mod buffer;
mod file_mgr;

pub use buffer::{ChunkBuffer, ChunkBufferMap, ChunkBufferRef, FileBuffer};
pub use file_mgr::{ChunkFileMgr, DEFAULT_PAGE_SIZE, MAX_FILE_PAGES};
