use std::io;
use thiserror::Error;

/// Unified error type for all strata operations.
///
/// The join-related variants map one-to-one onto the recovery policy of the
/// join orchestrator: [`Error::TableMustBeReplicated`] and the column
/// preflight failures abort the query, [`Error::HashJoinFail`] triggers a
/// re-plan with a loop join, and everything else is fatal for the current
/// operation only.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet library error while reading foreign files.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Invalid user input or API parameter. Option validation failures on
    /// foreign table creation and alteration use this variant; the message
    /// is surfaced to the user verbatim.
    #[error("{0}")]
    InvalidArgumentError(String),

    /// Storage key or entity not found.
    #[error("Storage key not found")]
    NotFound,

    /// The requested hash table would exceed the addressable entry space
    /// (`i32::MAX` entries). Fatal for the hash join strategy; the caller
    /// falls back to a nested-loop join.
    #[error("Hash tables with more than 2B entries not supported yet: {0}")]
    TooManyHashEntries(String),

    /// In cluster mode the inner table of a keyed join must be replicated
    /// (or sharded on the join key). Aborts the query.
    #[error("Hash join failed: table {0} must be replicated")]
    TableMustBeReplicated(String),

    /// Recoverable hash join failure; the query engine re-plans with a loop
    /// join when possible.
    #[error("Hash join failed: {0}")]
    HashJoinFail(String),

    /// Equijoin on a virtual column is not supported.
    #[error("Cannot join on rowid")]
    FailedToJoinOnVirtualColumn,

    /// A join column could not be fetched for the build side.
    #[error("Not enough memory for columns involved in join")]
    FailedToFetchColumn,

    /// Dictionary-encoded column could not be translated for the join.
    #[error("Columnar conversion not supported for variable length types")]
    ColumnarConversionNotSupported(String),

    /// Allocation failure while building a hash table.
    #[error("Ran out of memory: {0}")]
    OutOfMemory(String),

    /// The cache was cleared but the subsequent re-population failed; the
    /// table is now empty in the cache and the caller must surface this.
    #[error("Refresh failed after cache eviction: {0}")]
    PostEvictionRefresh(String),

    /// Rejected cache size configuration.
    #[error("{0}")]
    CacheTooSmall(String),

    /// Internal error indicating a bug or unexpected state.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error must bypass the one-to-many retry in the join
    /// orchestrator and abort the build outright.
    pub fn aborts_layout_retry(&self) -> bool {
        matches!(
            self,
            Error::TableMustBeReplicated(_)
                | Error::FailedToJoinOnVirtualColumn
                | Error::TooManyHashEntries(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_bypass_classification() {
        assert!(Error::TableMustBeReplicated("t".to_string()).aborts_layout_retry());
        assert!(Error::FailedToJoinOnVirtualColumn.aborts_layout_retry());
        assert!(!Error::HashJoinFail("dup".to_string()).aborts_layout_retry());
        assert!(!Error::Internal("x".to_string()).aborts_layout_retry());
    }
}
