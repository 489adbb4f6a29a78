//! Unified error type for the strata stack.
//!
//! Every fallible operation across the storage, foreign-storage, and join
//! crates returns [`Result<T>`]. Errors propagate upward with `?`; the
//! orchestration layers match on specific variants to decide between retry,
//! fallback, and surfacing to the user.

mod error;

pub use error::Error;

/// Convenience alias used across all strata crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;
