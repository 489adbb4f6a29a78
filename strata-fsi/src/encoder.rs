//! Arrow-to-chunk encoding shared by the data wrappers.
//!
//! Fixed-width columns encode as dense little-endian values with inline null
//! sentinels. Variable-length text encodes as a data chunk of concatenated
//! bytes plus an index chunk of `i32` offsets (`num_elements + 1` entries,
//! the first always zero).

use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use strata_result::{Error, Result};
use strata_types::{ChunkMetadata, ChunkStats, SqlType};

use crate::table::ColumnSchema;

/// Chunk bytes and metadata for one column of one fragment.
pub struct EncodedColumn {
    pub data: Vec<u8>,
    pub index: Option<Vec<u8>>,
    pub metadata: ChunkMetadata,
}

pub fn arrow_data_type(sql_type: SqlType) -> DataType {
    match sql_type {
        SqlType::SmallInt => DataType::Int16,
        SqlType::Int => DataType::Int32,
        SqlType::BigInt => DataType::Int64,
        SqlType::Float => DataType::Float32,
        SqlType::Double => DataType::Float64,
        SqlType::Text => DataType::Utf8,
    }
}

/// Arrow schema matching a foreign table's column definitions; all fields
/// nullable.
pub fn arrow_schema(columns: &[ColumnSchema]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| Field::new(c.name.clone(), arrow_data_type(c.sql_type), true))
            .collect::<Vec<_>>(),
    )
}

fn downcast_err(expected: &str) -> Error {
    Error::Internal(format!("Expected {expected}"))
}

macro_rules! encode_fixed {
    ($array:expr, $arrow_ty:ty, $name:literal, $sql_type:expr, $to_i64:expr, $to_bytes:expr) => {{
        let array = $array
            .as_any()
            .downcast_ref::<$arrow_ty>()
            .ok_or_else(|| downcast_err($name))?;
        let mut data = Vec::with_capacity(array.len() * $sql_type.logical_size());
        let mut stats = ChunkStats {
            min: i64::MAX,
            max: i64::MIN,
            has_nulls: false,
        };
        for row in 0..array.len() {
            if array.is_null(row) {
                stats.has_nulls = true;
                data.extend_from_slice(&$to_bytes(None));
            } else {
                let value = array.value(row);
                let widened: i64 = $to_i64(value);
                stats.min = stats.min.min(widened);
                stats.max = stats.max.max(widened);
                data.extend_from_slice(&$to_bytes(Some(value)));
            }
        }
        if stats.min > stats.max {
            stats.min = 0;
            stats.max = 0;
        }
        let metadata = ChunkMetadata::new($sql_type, data.len(), array.len(), stats);
        Ok(EncodedColumn {
            data,
            index: None,
            metadata,
        })
    }};
}

/// Encode one column of a fragment into chunk bytes.
pub fn encode_column(column: &ColumnSchema, array: &ArrayRef) -> Result<EncodedColumn> {
    match column.sql_type {
        SqlType::SmallInt => encode_fixed!(
            array,
            Int16Array,
            "Int16Array",
            SqlType::SmallInt,
            |v: i16| v as i64,
            |v: Option<i16>| v.unwrap_or(i16::MIN).to_le_bytes()
        ),
        SqlType::Int => encode_fixed!(
            array,
            Int32Array,
            "Int32Array",
            SqlType::Int,
            |v: i32| v as i64,
            |v: Option<i32>| v.unwrap_or(i32::MIN).to_le_bytes()
        ),
        SqlType::BigInt => encode_fixed!(
            array,
            Int64Array,
            "Int64Array",
            SqlType::BigInt,
            |v: i64| v,
            |v: Option<i64>| v.unwrap_or(i64::MIN).to_le_bytes()
        ),
        SqlType::Float => encode_fixed!(
            array,
            Float32Array,
            "Float32Array",
            SqlType::Float,
            |v: f32| v as i64,
            |v: Option<f32>| v.unwrap_or(f32::MIN).to_le_bytes()
        ),
        SqlType::Double => encode_fixed!(
            array,
            Float64Array,
            "Float64Array",
            SqlType::Double,
            |v: f64| v as i64,
            |v: Option<f64>| v.unwrap_or(f64::MIN).to_le_bytes()
        ),
        SqlType::Text => encode_text(array),
    }
}

fn encode_text(array: &ArrayRef) -> Result<EncodedColumn> {
    let array = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| downcast_err("StringArray"))?;
    let mut data = Vec::new();
    let mut index = Vec::with_capacity((array.len() + 1) * 4);
    index.extend_from_slice(&0i32.to_le_bytes());
    let mut has_nulls = false;
    for row in 0..array.len() {
        if array.is_null(row) {
            has_nulls = true;
        } else {
            data.extend_from_slice(array.value(row).as_bytes());
        }
        let end = i32::try_from(data.len())
            .map_err(|_| Error::Internal("text chunk exceeds 2GB".to_string()))?;
        index.extend_from_slice(&end.to_le_bytes());
    }
    let metadata = ChunkMetadata::new(
        SqlType::Text,
        data.len(),
        array.len(),
        ChunkStats {
            min: 0,
            max: 0,
            has_nulls,
        },
    );
    Ok(EncodedColumn {
        data,
        index: Some(index),
        metadata,
    })
}
