use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use strata_result::{Error, Result};
use strata_types::{ChunkKey, ChunkMetadata, ChunkMetadataVector};

use crate::buffer::{ChunkBuffer, ChunkBufferRef, FileBuffer};

/// Maximum number of pages one logical storage file holds. Per-table cache
/// budgets are expressed in multiples of this.
pub const MAX_FILE_PAGES: usize = 256;

/// Default page size for cache storage.
pub const DEFAULT_PAGE_SIZE: usize = 2 * 1024 * 1024;

const MANIFEST_FILE_NAME: &str = "manifest.bin";

#[derive(bitcode::Encode, bitcode::Decode)]
struct ManifestEntry {
    key: ChunkKey,
    metadata: Option<ChunkMetadata>,
    num_bytes: usize,
    page_count: usize,
}

#[derive(Default)]
struct TableFiles {
    buffers: BTreeMap<ChunkKey, Arc<Mutex<FileBuffer>>>,
}

/// Maps chunk keys to page-granular buffers persisted under one directory
/// per table prefix.
///
/// Writes accumulate in memory; [`ChunkFileMgr::checkpoint`] (or the
/// per-table variant) is the only persistence fence. On construction any
/// existing table directories are scanned back in, so a fresh process can
/// serve metadata and buffer reads for previously checkpointed chunks.
pub struct ChunkFileMgr {
    base_path: PathBuf,
    page_size: usize,
    tables: RwLock<BTreeMap<ChunkKey, TableFiles>>,
}

impl ChunkFileMgr {
    pub fn new(base_path: &Path, page_size: usize) -> Result<Self> {
        validate_path(base_path)?;
        let mgr = Self {
            base_path: base_path.to_path_buf(),
            page_size,
            tables: RwLock::new(BTreeMap::new()),
        };
        mgr.recover_from_disk()?;
        Ok(mgr)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding the given table's chunk files, created on demand.
    pub fn ensure_table_dir(&self, table_prefix: &ChunkKey) -> Result<PathBuf> {
        let dir = self.table_dir(table_prefix);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn table_dir(&self, table_prefix: &ChunkKey) -> PathBuf {
        debug_assert!(table_prefix.has_table_prefix());
        self.base_path.join(format!(
            "table_{}_{}",
            table_prefix.db_id(),
            table_prefix.table_id()
        ))
    }

    /// Create an empty buffer for `key`, replacing any existing one.
    pub fn create_buffer(&self, key: &ChunkKey) -> ChunkBufferRef {
        let buffer = Arc::new(Mutex::new(FileBuffer::new(self.page_size)));
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .entry(key.table_prefix())
            .or_default()
            .buffers
            .insert(key.clone(), Arc::clone(&buffer));
        buffer
    }

    pub fn get_buffer(&self, key: &ChunkKey) -> Result<ChunkBufferRef> {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables
            .get(&key.table_prefix())
            .and_then(|t| t.buffers.get(key))
            .map(|b| {
                let concrete: Arc<Mutex<FileBuffer>> = Arc::clone(b);
                let buffer: ChunkBufferRef = concrete;
                buffer
            })
            .ok_or(Error::NotFound)
    }

    pub fn has_buffer(&self, key: &ChunkKey) -> bool {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables
            .get(&key.table_prefix())
            .is_some_and(|t| t.buffers.contains_key(key))
    }

    /// Copy `bytes` (and metadata, when given) into the buffer for `key`,
    /// creating it if absent. The write is durable only after a checkpoint.
    pub fn put_buffer(
        &self,
        key: &ChunkKey,
        bytes: &[u8],
        metadata: Option<ChunkMetadata>,
    ) -> Result<()> {
        let mut tables = self.tables.write().expect("tables lock poisoned");
        let buffer = tables
            .entry(key.table_prefix())
            .or_default()
            .buffers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(FileBuffer::new(self.page_size))));
        buffer
            .lock()
            .expect("file buffer lock poisoned")
            .write_all(bytes, metadata);
        Ok(())
    }

    pub fn delete_buffer(&self, key: &ChunkKey) -> Result<()> {
        let removed = {
            let mut tables = self.tables.write().expect("tables lock poisoned");
            tables
                .get_mut(&key.table_prefix())
                .and_then(|t| t.buffers.remove(key))
        };
        if removed.is_some() {
            let path = self.chunk_file_path(key);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Append `(key, metadata)` pairs for every buffer under `prefix` that
    /// carries metadata, in key order.
    pub fn get_chunk_metadata_for_prefix(
        &self,
        out: &mut ChunkMetadataVector,
        prefix: &ChunkKey,
    ) {
        let tables = self.tables.read().expect("tables lock poisoned");
        for (table_key, files) in tables.iter() {
            if !table_key.in_prefix(prefix) && !prefix.in_prefix(table_key) {
                continue;
            }
            for (key, buffer) in files.buffers.iter() {
                if !key.in_prefix(prefix) {
                    continue;
                }
                let guard = buffer.lock().expect("file buffer lock poisoned");
                if let Some(metadata) = guard.metadata() {
                    out.push((key.clone(), metadata.clone()));
                }
            }
        }
    }

    /// Drop every buffer for the table and delete its directory.
    pub fn remove_table_related_ds(&self, db_id: i32, table_id: i32) -> Result<()> {
        let table_key = ChunkKey::table(db_id, table_id);
        {
            let mut tables = self.tables.write().expect("tables lock poisoned");
            tables.remove(&table_key);
        }
        let dir = self.table_dir(&table_key);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Persist every dirty buffer of every table.
    pub fn checkpoint(&self) -> Result<()> {
        let table_keys: Vec<ChunkKey> = {
            let tables = self.tables.read().expect("tables lock poisoned");
            tables.keys().cloned().collect()
        };
        for table_key in table_keys {
            self.checkpoint_table(table_key.db_id(), table_key.table_id())?;
        }
        Ok(())
    }

    /// Persist every dirty buffer of one table and rewrite its manifest.
    pub fn checkpoint_table(&self, db_id: i32, table_id: i32) -> Result<()> {
        let table_key = ChunkKey::table(db_id, table_id);
        let dir = self.ensure_table_dir(&table_key)?;

        let buffers: Vec<(ChunkKey, Arc<Mutex<FileBuffer>>)> = {
            let tables = self.tables.read().expect("tables lock poisoned");
            match tables.get(&table_key) {
                Some(files) => files
                    .buffers
                    .iter()
                    .map(|(k, b)| (k.clone(), Arc::clone(b)))
                    .collect(),
                None => return Ok(()),
            }
        };

        let mut manifest = Vec::with_capacity(buffers.len());
        for (key, buffer) in &buffers {
            let mut guard = buffer.lock().expect("file buffer lock poisoned");
            let page_count = guard.page_count();
            let data_path = dir.join(chunk_file_name(key));
            if guard.is_dirty() {
                if page_count > 0 {
                    let mut file_bytes = guard.as_bytes().to_vec();
                    file_bytes.resize(page_count * self.page_size, 0);
                    fs::write(&data_path, &file_bytes)?;
                } else if data_path.exists() {
                    fs::remove_file(&data_path)?;
                }
                guard.clear_dirty();
            }
            manifest.push(ManifestEntry {
                key: key.clone(),
                metadata: guard.metadata().cloned(),
                num_bytes: guard.size(),
                page_count,
            });
        }
        fs::write(dir.join(MANIFEST_FILE_NAME), bitcode::encode(&manifest))?;
        tracing::debug!(
            db_id,
            table_id,
            buffers = manifest.len(),
            "checkpointed table chunk files"
        );
        Ok(())
    }

    fn chunk_file_path(&self, key: &ChunkKey) -> PathBuf {
        self.table_dir(&key.table_prefix()).join(chunk_file_name(key))
    }

    fn recover_from_disk(&self) -> Result<()> {
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(table_key) = parse_table_dir_name(&name.to_string_lossy()) else {
                continue;
            };
            let manifest_path = entry.path().join(MANIFEST_FILE_NAME);
            if !manifest_path.exists() {
                continue;
            }
            let manifest: Vec<ManifestEntry> = bitcode::decode(&fs::read(&manifest_path)?)
                .map_err(|e| Error::Internal(format!("corrupt chunk manifest: {e}")))?;
            let mut files = TableFiles::default();
            for item in manifest {
                let mut buffer = FileBuffer::new(self.page_size);
                if item.page_count > 0 {
                    let data_path = entry.path().join(chunk_file_name(&item.key));
                    let mut bytes = fs::read(&data_path)?;
                    bytes.truncate(item.num_bytes);
                    buffer.write_all(&bytes, item.metadata);
                } else if let Some(metadata) = item.metadata {
                    buffer.set_metadata(metadata);
                }
                buffer.clear_dirty();
                files
                    .buffers
                    .insert(item.key, Arc::new(Mutex::new(buffer)));
            }
            let mut tables = self.tables.write().expect("tables lock poisoned");
            tables.insert(table_key, files);
        }
        Ok(())
    }
}

fn chunk_file_name(key: &ChunkKey) -> String {
    let parts = key.as_slice();
    let suffix: Vec<String> = parts[2..].iter().map(|p| p.to_string()).collect();
    format!("chunk_{}.data", suffix.join("_"))
}

fn parse_table_dir_name(name: &str) -> Option<ChunkKey> {
    let rest = name.strip_prefix("table_")?;
    let mut parts = rest.splitn(2, '_');
    let db_id: i32 = parts.next()?.parse().ok()?;
    let table_id: i32 = parts.next()?.parse().ok()?;
    Some(ChunkKey::table(db_id, table_id))
}

fn validate_path(base_path: &Path) -> Result<()> {
    if base_path.exists() {
        if !base_path.is_dir() {
            return Err(Error::InvalidArgumentError(format!(
                "cache path \"{}\" is not a directory",
                base_path.display()
            )));
        }
    } else {
        fs::create_dir_all(base_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{ChunkStats, SqlType};
    use tempfile::TempDir;

    fn meta(bytes: usize, elems: usize) -> ChunkMetadata {
        ChunkMetadata::new(
            SqlType::Int,
            bytes,
            elems,
            ChunkStats {
                min: 0,
                max: 10,
                has_nulls: false,
            },
        )
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mgr = ChunkFileMgr::new(dir.path(), 16).unwrap();
        let key = ChunkKey::chunk(1, 2, 3, 0);
        mgr.put_buffer(&key, &[1, 2, 3, 4], Some(meta(4, 1))).unwrap();
        let buf = mgr.get_buffer(&key).unwrap();
        let guard = buf.lock().unwrap();
        assert_eq!(guard.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(guard.metadata().unwrap().num_bytes, 4);
    }

    #[test]
    fn checkpoint_then_reopen_recovers() {
        let dir = TempDir::new().unwrap();
        let key = ChunkKey::chunk(1, 2, 3, 0);
        let meta_only_key = ChunkKey::chunk(1, 2, 4, 0);
        {
            let mgr = ChunkFileMgr::new(dir.path(), 16).unwrap();
            mgr.put_buffer(&key, &[9; 20], Some(meta(20, 5))).unwrap();
            let meta_buf = mgr.create_buffer(&meta_only_key);
            meta_buf.lock().unwrap().set_metadata(meta(0, 0));
            mgr.checkpoint().unwrap();
        }
        let mgr = ChunkFileMgr::new(dir.path(), 16).unwrap();
        let buf = mgr.get_buffer(&key).unwrap();
        let guard = buf.lock().unwrap();
        assert_eq!(guard.as_bytes(), &[9; 20]);
        assert_eq!(guard.page_count(), 2);
        drop(guard);

        // Metadata-only buffers come back with zero pages.
        let meta_buf = mgr.get_buffer(&meta_only_key).unwrap();
        let guard = meta_buf.lock().unwrap();
        assert_eq!(guard.page_count(), 0);
        assert!(guard.metadata().is_some());

        let mut out = ChunkMetadataVector::new();
        mgr.get_chunk_metadata_for_prefix(&mut out, &ChunkKey::table(1, 2));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn remove_table_related_ds_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let mgr = ChunkFileMgr::new(dir.path(), 16).unwrap();
        let key = ChunkKey::chunk(1, 2, 3, 0);
        mgr.put_buffer(&key, &[1], None).unwrap();
        mgr.checkpoint().unwrap();
        assert!(dir.path().join("table_1_2").exists());
        mgr.remove_table_related_ds(1, 2).unwrap();
        assert!(!dir.path().join("table_1_2").exists());
        assert!(mgr.get_buffer(&key).is_err());
    }

    #[test]
    fn rejects_non_directory_path() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("plain_file");
        fs::write(&file_path, b"x").unwrap();
        assert!(ChunkFileMgr::new(&file_path, 16).is_err());
    }
}
