use serde::{Deserialize, Serialize};

/// Inclusive range of Parquet row groups within one file, as assigned to a
/// fragment by the Parquet data wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowGroupInterval {
    pub file_path: String,
    pub start_index: usize,
    pub end_index: usize,
}

/// Contiguous run of rows within a delimited text file, as assigned to a
/// fragment by the CSV data wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegion {
    /// Byte offset of the first row of the region within the file.
    pub first_row_file_offset: u64,
    /// Index of the first row relative to the first data row of the file.
    pub first_row_index: usize,
    /// Number of rows in the region.
    pub row_count: usize,
    /// Size of the region in bytes.
    pub region_size: u64,
}

impl PartialOrd for FileRegion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileRegion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.first_row_file_offset.cmp(&other.first_row_file_offset)
    }
}
