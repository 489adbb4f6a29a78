use crate::chunk_key::ChunkKey;
use crate::sql_type::SqlType;
use serde::{Deserialize, Serialize};

/// Min/max/null summary of one chunk, used for scan pruning. The bounds are
/// widened into the `i64` domain; they are advisory, never load-bearing for
/// correctness.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub struct ChunkStats {
    pub min: i64,
    pub max: i64,
    pub has_nulls: bool,
}

/// Descriptive metadata for one chunk. Purely a value; owned by whoever
/// cached it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct ChunkMetadata {
    pub sql_type: SqlType,
    pub num_bytes: usize,
    pub num_elements: usize,
    pub stats: ChunkStats,
}

impl ChunkMetadata {
    pub fn new(sql_type: SqlType, num_bytes: usize, num_elements: usize, stats: ChunkStats) -> Self {
        Self {
            sql_type,
            num_bytes,
            num_elements,
            stats,
        }
    }
}

/// Ordered collection of `(key, metadata)` pairs produced by metadata scans.
pub type ChunkMetadataVector = Vec<(ChunkKey, ChunkMetadata)>;
