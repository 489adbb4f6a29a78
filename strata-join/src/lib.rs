//! Composite-key equi-join hash tables.
//!
//! This crate builds, caches, and probes the baseline hash tables used by
//! the join operator for N-ary equi-joins: a byte-addressable table layout
//! ([`HashTableGeometry`]), a CPU builder with an open-addressing fill
//! ([`HashTableBuilder`]), a HyperLogLog estimator that sizes one-to-many
//! tables, process-wide result/layout caches ([`JoinHashTableCaches`]), and
//! the orchestrator ([`KeyedJoinHashTable`]) that normalises column pairs,
//! picks a layout, builds per device, and exposes the probe-site contract to
//! an external code generator.

#![forbid(unsafe_code)]

mod builder;
mod cache;
mod columns;
#[cfg(feature = "gpu")]
mod device;
mod hll;
mod layout;
mod orchestrator;
mod probe;
mod table;

pub use builder::HashTableBuilder;
pub use cache::{HashTableCacheKey, JoinHashTableCaches};
pub use columns::{
    ColumnRef, ColumnsForDevice, CompositeKeyInfo, FragmentInfo, GenericKeyHandler,
    InnerOuterPair, JoinColumn, JoinColumnFetcher, JoinColumnTypeInfo, QueryInfo,
    StringDictProxy,
};
#[cfg(feature = "gpu")]
pub use device::{DeviceAllocator, DeviceBuffer};
pub use hll::{approximate_distinct_tuples, HllSketch, HLL_PRECISION_BITS};
pub use layout::HashTableGeometry;
pub use orchestrator::{JoinCondition, JoinHashTableConfig, KeyedJoinHashTable};
pub use probe::{
    baseline_hash_join_idx_32, baseline_hash_join_idx_64, build_probe_key,
    get_composite_key_index_32, get_composite_key_index_64, hash_composite_key,
    matching_set_for_slot, self_join_not_covered_by_left_deep_tree, ProbeSiteContract,
    PROBE_MISS,
};
pub use table::{CompositeHashTable, DecodedJoinEntry};

use std::fmt;

/// Memory tier a hash table is built into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLevel {
    Cpu,
    Gpu,
}

/// Physical organisation of the hash table buffer, varying with the per-key
/// multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashTableLayout {
    /// Each composite key maps to exactly one payload slot.
    OneToOne,
    /// Payload is an offsets/counts/row-id table; multiple rows per key.
    OneToMany,
    /// As one-to-many, but each input row yields multiple keys.
    ManyToMany,
}

impl HashTableLayout {
    /// True when the layout carries the offsets/counts/payload regions.
    pub fn requires_additional_buffers(&self) -> bool {
        matches!(self, HashTableLayout::OneToMany | HashTableLayout::ManyToMany)
    }
}

impl fmt::Display for HashTableLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashTableLayout::OneToOne => write!(f, "OneToOne"),
            HashTableLayout::OneToMany => write!(f, "OneToMany"),
            HashTableLayout::ManyToMany => write!(f, "ManyToMany"),
        }
    }
}

/// Join predicate operator. Distinct-equals and bitwise-equals (null-safe)
/// produce distinct cache keys and different null handling during build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinOperator {
    /// `=`: nulls never match.
    Eq,
    /// `<=>`: nulls match themselves.
    BwEq,
    /// Spatial overlaps predicate; forces a multi-entry layout.
    Overlaps,
}

impl JoinOperator {
    pub fn is_bitwise_eq(&self) -> bool {
        matches!(self, JoinOperator::BwEq)
    }
}
