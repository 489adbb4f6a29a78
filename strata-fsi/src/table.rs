//! Foreign table configuration and the in-process table registry.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use strata_result::{Error, Result};
use strata_types::{ChunkKey, SqlType};
use time::OffsetDateTime;

use crate::options::{
    self, create_options_map, OptionsMap, APPEND_REFRESH_UPDATE_TYPE, BASE_PATH_KEY,
    FILE_PATH_KEY, FRAGMENT_SIZE_KEY, LOCAL_FILE_STORAGE_TYPE, REFRESH_UPDATE_TYPE_KEY,
    STORAGE_TYPE_KEY,
};

/// Default number of rows per fragment when the table does not override it.
pub const DEFAULT_FRAGMENT_SIZE: usize = 2 * 1024 * 1024;

/// Format of the external data a foreign table reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWrapperType {
    Csv,
    Parquet,
}

impl DataWrapperType {
    /// Wrapper-specific table options accepted in addition to the common set.
    pub fn supported_table_options(&self) -> &'static [&'static str] {
        match self {
            DataWrapperType::Csv => &[
                "BUFFER_SIZE",
                "DELIMITER",
                "ESCAPE",
                "HEADER",
                "LINE_DELIMITER",
                "NULLS",
                "QUOTE",
                "QUOTED",
            ],
            DataWrapperType::Parquet => &[],
        }
    }
}

/// Schema entry for one column of a foreign table. Column ids are 1-based
/// and dense.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub column_id: i32,
    pub name: String,
    pub sql_type: SqlType,
}

/// Server-level configuration shared by the tables it hosts.
#[derive(Debug, Clone)]
pub struct ForeignServerConfig {
    pub wrapper_type: DataWrapperType,
    pub options: OptionsMap,
}

impl ForeignServerConfig {
    pub fn local_file(wrapper_type: DataWrapperType, base_path: &str) -> Self {
        let mut options = OptionsMap::new();
        options.insert(STORAGE_TYPE_KEY.to_string(), LOCAL_FILE_STORAGE_TYPE.to_string());
        options.insert(BASE_PATH_KEY.to_string(), base_path.to_string());
        Self {
            wrapper_type,
            options,
        }
    }
}

/// Definition of one foreign table: identity, schema, server, and validated
/// options.
#[derive(Debug, Clone)]
pub struct ForeignTableConfig {
    pub db_id: i32,
    pub table_id: i32,
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub server: ForeignServerConfig,
    pub options: OptionsMap,
}

impl ForeignTableConfig {
    /// Build and validate a table definition. Option keys and selected
    /// values are normalised; unknown and invalid options are rejected here,
    /// at creation time.
    pub fn new<I>(
        db_id: i32,
        table_id: i32,
        name: impl Into<String>,
        columns: Vec<ColumnSchema>,
        server: ForeignServerConfig,
        raw_options: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table_options = create_options_map(raw_options);
        table_options
            .entry(options::REFRESH_TIMING_TYPE_KEY.to_string())
            .or_insert_with(|| options::MANUAL_REFRESH_TIMING_TYPE.to_string());
        table_options
            .entry(REFRESH_UPDATE_TYPE_KEY.to_string())
            .or_insert_with(|| options::ALL_REFRESH_UPDATE_TYPE.to_string());

        options::validate_supported_options(
            &table_options,
            server.wrapper_type.supported_table_options(),
        )?;
        options::validate_refresh_options(&table_options, OffsetDateTime::now_utc())?;

        Ok(Self {
            db_id,
            table_id,
            name: name.into(),
            columns,
            server,
            options: table_options,
        })
    }

    pub fn table_key(&self) -> ChunkKey {
        ChunkKey::table(self.db_id, self.table_id)
    }

    pub fn column(&self, column_id: i32) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }

    pub fn is_append_mode(&self) -> bool {
        self.options
            .get(REFRESH_UPDATE_TYPE_KEY)
            .is_some_and(|v| v == APPEND_REFRESH_UPDATE_TYPE)
    }

    pub fn fragment_size(&self) -> usize {
        self.options
            .get(FRAGMENT_SIZE_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FRAGMENT_SIZE)
    }

    /// Resolve the external file path. For `LOCAL_FILE` servers the table's
    /// `FILE_PATH` is joined onto the server's `BASE_PATH` and duplicate
    /// path separators collapse; otherwise the path is a remote key prefix
    /// returned as-is.
    pub fn resolved_file_path(&self) -> Result<String> {
        let file_path = self
            .options
            .get(FILE_PATH_KEY)
            .cloned()
            .unwrap_or_default();
        let storage_type = self
            .server
            .options
            .get(STORAGE_TYPE_KEY)
            .map(String::as_str)
            .unwrap_or(LOCAL_FILE_STORAGE_TYPE);
        if storage_type == LOCAL_FILE_STORAGE_TYPE {
            let base_path = self.server.options.get(BASE_PATH_KEY).ok_or_else(|| {
                Error::InvalidArgumentError(
                    "No base path found in foreign server options.".to_string(),
                )
            })?;
            let sep = std::path::MAIN_SEPARATOR;
            let mut joined = format!("{base_path}{sep}{file_path}");
            let doubled = format!("{sep}{sep}");
            while joined.contains(&doubled) {
                joined = joined.replace(&doubled, &sep.to_string());
            }
            Ok(joined)
        } else {
            Ok(file_path)
        }
    }
}

/// Last/next refresh timestamps tracked per foreign table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshTimes {
    pub last_refresh_time: Option<OffsetDateTime>,
    pub next_refresh_time: Option<OffsetDateTime>,
}

/// In-process registry mapping table keys to foreign table definitions.
/// Stands in for the database catalog the storage managers would otherwise
/// consult.
#[derive(Default)]
pub struct TableRegistry {
    tables: RwLock<BTreeMap<ChunkKey, Arc<ForeignTableConfig>>>,
    refresh_times: RwLock<BTreeMap<ChunkKey, RefreshTimes>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, config: ForeignTableConfig) -> Arc<ForeignTableConfig> {
        let config = Arc::new(config);
        let mut tables = self.tables.write().expect("table registry lock poisoned");
        tables.insert(config.table_key(), Arc::clone(&config));
        config
    }

    pub fn get(&self, table_key: &ChunkKey) -> Result<Arc<ForeignTableConfig>> {
        let tables = self.tables.read().expect("table registry lock poisoned");
        tables.get(table_key).cloned().ok_or(Error::NotFound)
    }

    pub fn get_by_name(&self, db_id: i32, name: &str) -> Result<Arc<ForeignTableConfig>> {
        let tables = self.tables.read().expect("table registry lock poisoned");
        tables
            .values()
            .find(|t| t.db_id == db_id && t.name == name)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// All registered tables, in table-key order.
    pub fn all_tables(&self) -> Vec<Arc<ForeignTableConfig>> {
        let tables = self.tables.read().expect("table registry lock poisoned");
        tables.values().cloned().collect()
    }

    /// Record a completed refresh and schedule the next one from the table's
    /// refresh options.
    pub fn update_refresh_times(&self, table_key: &ChunkKey) -> Result<()> {
        let config = self.get(table_key)?;
        let now = OffsetDateTime::now_utc();
        let next = options::next_refresh_time(&config.options, now)?;
        let mut times = self
            .refresh_times
            .write()
            .expect("refresh times lock poisoned");
        times.insert(
            table_key.clone(),
            RefreshTimes {
                last_refresh_time: Some(now),
                next_refresh_time: next,
            },
        );
        Ok(())
    }

    pub fn refresh_times(&self, table_key: &ChunkKey) -> RefreshTimes {
        let times = self
            .refresh_times
            .read()
            .expect("refresh times lock poisoned");
        times.get(table_key).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnSchema> {
        vec![ColumnSchema {
            column_id: 1,
            name: "id".to_string(),
            sql_type: SqlType::Int,
        }]
    }

    fn table_with_options(pairs: &[(&str, &str)]) -> Result<ForeignTableConfig> {
        ForeignTableConfig::new(
            1,
            2,
            "t",
            columns(),
            ForeignServerConfig::local_file(DataWrapperType::Csv, "/base"),
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn defaults_applied() {
        let table = table_with_options(&[]).unwrap();
        assert!(!table.is_append_mode());
        assert_eq!(
            table.options.get(REFRESH_UPDATE_TYPE_KEY).unwrap(),
            options::ALL_REFRESH_UPDATE_TYPE
        );
        assert_eq!(table.fragment_size(), DEFAULT_FRAGMENT_SIZE);
    }

    #[test]
    fn append_mode_detected() {
        let table = table_with_options(&[("refresh_update_type", "append")]).unwrap();
        assert!(table.is_append_mode());
    }

    #[test]
    fn unknown_option_rejected_on_create() {
        assert!(table_with_options(&[("shard_count", "4")]).is_err());
    }

    #[test]
    fn file_path_resolution_collapses_separators() {
        let table = ForeignTableConfig::new(
            1,
            2,
            "t",
            columns(),
            ForeignServerConfig::local_file(DataWrapperType::Csv, "/base/dir/"),
            [(FILE_PATH_KEY.to_string(), "/sub//file.csv".to_string())],
        )
        .unwrap();
        assert_eq!(table.resolved_file_path().unwrap(), "/base/dir/sub/file.csv");
    }

    #[test]
    fn registry_lookup_by_key_and_name() {
        let registry = TableRegistry::new();
        let table = table_with_options(&[]).unwrap();
        registry.register_table(table);
        assert!(registry.get(&ChunkKey::table(1, 2)).is_ok());
        assert!(registry.get_by_name(1, "t").is_ok());
        assert!(registry.get(&ChunkKey::table(1, 3)).is_err());
    }
}
