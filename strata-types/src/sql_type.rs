use serde::{Deserialize, Serialize};

/// Logical column type as seen by the storage and join layers.
///
/// `Text` is variable-length: its chunks split into a data portion (the
/// concatenated bytes) and an index portion (row end offsets). All other
/// variants are fixed-width.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub enum SqlType {
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Text,
}

impl SqlType {
    /// Width in bytes of one element as it participates in comparisons.
    /// Dictionary-encoded text joins on 32-bit ids.
    pub fn logical_size(&self) -> usize {
        match self {
            SqlType::SmallInt => 2,
            SqlType::Int => 4,
            SqlType::BigInt => 8,
            SqlType::Float => 4,
            SqlType::Double => 8,
            SqlType::Text => 4,
        }
    }

    pub fn is_varlen(&self) -> bool {
        matches!(self, SqlType::Text)
    }

    /// Inline null sentinel for fixed-width encodings.
    pub fn null_sentinel(&self) -> i64 {
        match self {
            SqlType::SmallInt => i16::MIN as i64,
            SqlType::Int | SqlType::Text => i32::MIN as i64,
            SqlType::BigInt => i64::MIN,
            SqlType::Float => f32::MIN.to_bits() as i32 as i64,
            SqlType::Double => f64::MIN.to_bits() as i64,
        }
    }
}
