//! Shared identifier and metadata types for the strata stack.
//!
//! The central type is [`ChunkKey`]: the ordered integer path that addresses
//! a unit of columnar storage (`[db, table, column, fragment, (sub)]`).
//! Everything that moves between the storage, cache, and join layers is keyed
//! by it.

mod chunk_key;
mod interval;
mod metadata;
mod sql_type;

pub use chunk_key::{
    ChunkKey, CHUNK_KEY_COLUMN_IDX, CHUNK_KEY_DB_IDX, CHUNK_KEY_FRAGMENT_IDX,
    CHUNK_KEY_TABLE_IDX, CHUNK_KEY_VARLEN_IDX, VARLEN_DATA_SUB_KEY, VARLEN_INDEX_SUB_KEY,
};
pub use interval::{FileRegion, RowGroupInterval};
pub use metadata::{ChunkMetadata, ChunkMetadataVector, ChunkStats};
pub use sql_type::SqlType;
