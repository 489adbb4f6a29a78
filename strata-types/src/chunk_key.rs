use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of the database id within a chunk key.
pub const CHUNK_KEY_DB_IDX: usize = 0;
/// Position of the table id within a chunk key.
pub const CHUNK_KEY_TABLE_IDX: usize = 1;
/// Position of the column id within a chunk key.
pub const CHUNK_KEY_COLUMN_IDX: usize = 2;
/// Position of the fragment id within a chunk key.
pub const CHUNK_KEY_FRAGMENT_IDX: usize = 3;
/// Position of the var-len sub key within a chunk key.
pub const CHUNK_KEY_VARLEN_IDX: usize = 4;

/// Sub key marking the data portion of a variable-length column chunk.
pub const VARLEN_DATA_SUB_KEY: i32 = 1;
/// Sub key marking the index portion of a variable-length column chunk.
pub const VARLEN_INDEX_SUB_KEY: i32 = 2;

/// Ordered integer path addressing a unit of columnar storage.
///
/// `[db, table]` identifies a table, `[db, table, column]` a column,
/// `[db, table, column, fragment]` a chunk, and a fifth component
/// distinguishes the data (`1`) and index (`2`) portions of variable-length
/// chunks. Keys order lexicographically, so a table prefix followed by
/// `i32::MAX` bounds the half-open interval of that table's keys.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub struct ChunkKey(Vec<i32>);

impl ChunkKey {
    pub fn new(parts: Vec<i32>) -> Self {
        Self(parts)
    }

    /// Key identifying a table: `[db, table]`.
    pub fn table(db_id: i32, table_id: i32) -> Self {
        Self(vec![db_id, table_id])
    }

    /// Key identifying a fixed-width chunk: `[db, table, column, fragment]`.
    pub fn chunk(db_id: i32, table_id: i32, column_id: i32, fragment_id: i32) -> Self {
        Self(vec![db_id, table_id, column_id, fragment_id])
    }

    /// Key identifying one portion of a variable-length chunk.
    pub fn varlen_chunk(
        db_id: i32,
        table_id: i32,
        column_id: i32,
        fragment_id: i32,
        sub_key: i32,
    ) -> Self {
        Self(vec![db_id, table_id, column_id, fragment_id, sub_key])
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn db_id(&self) -> i32 {
        self.0[CHUNK_KEY_DB_IDX]
    }

    pub fn table_id(&self) -> i32 {
        self.0[CHUNK_KEY_TABLE_IDX]
    }

    pub fn column_id(&self) -> i32 {
        self.0[CHUNK_KEY_COLUMN_IDX]
    }

    pub fn fragment_id(&self) -> i32 {
        self.0[CHUNK_KEY_FRAGMENT_IDX]
    }

    /// True when this key addresses a table (`[db, table]`).
    pub fn is_table_key(&self) -> bool {
        self.0.len() == 2
    }

    /// True when at least the `[db, table]` prefix is present.
    pub fn has_table_prefix(&self) -> bool {
        self.0.len() >= 2
    }

    /// The `[db, table]` prefix of this key.
    pub fn table_prefix(&self) -> ChunkKey {
        debug_assert!(self.has_table_prefix());
        ChunkKey(self.0[..2].to_vec())
    }

    /// True when this key addresses one portion of a variable-length chunk.
    pub fn is_varlen_key(&self) -> bool {
        self.0.len() == 5
    }

    /// True when this key addresses the data portion of a variable-length
    /// chunk.
    pub fn is_varlen_data_key(&self) -> bool {
        self.is_varlen_key() && self.0[CHUNK_KEY_VARLEN_IDX] == VARLEN_DATA_SUB_KEY
    }

    /// The index-portion sibling of a variable-length data key.
    pub fn index_sibling(&self) -> ChunkKey {
        debug_assert!(self.is_varlen_data_key());
        let mut parts = self.0.clone();
        parts[CHUNK_KEY_VARLEN_IDX] = VARLEN_INDEX_SUB_KEY;
        ChunkKey(parts)
    }

    /// Smallest key strictly greater than every key sharing this prefix.
    pub fn upper_bound_of_prefix(&self) -> ChunkKey {
        let mut parts = self.0.clone();
        parts.push(i32::MAX);
        ChunkKey(parts)
    }

    /// True when `prefix` is a (non-strict) prefix of this key.
    pub fn in_prefix(&self, prefix: &ChunkKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKey{:?}", self.0)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<i32>> for ChunkKey {
    fn from(parts: Vec<i32>) -> Self {
        Self(parts)
    }
}
