//! Foreign Storage Interface (FSI).
//!
//! External tabular files (CSV, Parquet) are exposed to the engine as
//! foreign tables. A per-format [`ForeignDataWrapper`] materialises chunk
//! buffers and metadata on demand; [`ForeignStorageMgr`] serves them
//! directly, and [`CachingForeignStorageMgr`] layers a disk-backed,
//! per-table, page-quota, LRU-evicting [`ForeignStorageCache`] underneath,
//! with append-mode and full-replace refresh.

#![forbid(unsafe_code)]

mod buffer;
mod cache;
mod caching_mgr;
mod csv_wrapper;
mod encoder;
mod eviction;
mod mgr;
mod options;
mod parquet_wrapper;
mod refresh;
mod table;
mod wrapper;

pub use buffer::ForeignStorageBuffer;
pub use cache::{DiskCacheConfig, DiskCacheLevel, ForeignStorageCache};
pub use caching_mgr::{CachingForeignStorageMgr, WRAPPER_METADATA_FILE_NAME};
pub use csv_wrapper::CsvDataWrapper;
pub use eviction::LruEvictionAlgorithm;
pub use mgr::{column_family_keys, ForeignStorageMgr};
pub use options::{
    create_options_map, next_refresh_time, parse_datetime, validate_alter_options,
    validate_refresh_options, validate_supported_options, OptionsMap,
    ALL_REFRESH_UPDATE_TYPE, APPEND_REFRESH_UPDATE_TYPE, BASE_PATH_KEY, FILE_PATH_KEY,
    FRAGMENT_SIZE_KEY, LOCAL_FILE_STORAGE_TYPE, MANUAL_REFRESH_TIMING_TYPE,
    REFRESH_INTERVAL_KEY, REFRESH_START_DATE_TIME_KEY, REFRESH_TIMING_TYPE_KEY,
    REFRESH_UPDATE_TYPE_KEY, SCHEDULE_REFRESH_TIMING_TYPE, STORAGE_TYPE_KEY,
};
pub use parquet_wrapper::ParquetDataWrapper;
pub use refresh::{refresh_foreign_table, RefreshScheduler};
pub use table::{
    ColumnSchema, DataWrapperType, ForeignServerConfig, ForeignTableConfig, RefreshTimes,
    TableRegistry,
};
pub use wrapper::{ForeignDataWrapper, MockForeignDataWrapper};
