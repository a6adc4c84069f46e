//! RocksDB-backed persistent document store.
//!
//! Column families:
//! - `documents`: full document content (JSON, LZ4 compressed), keyed by id
//! - `metadata`: [`DocumentMetadata`] (bincode), keyed by id
//!
//! Content and metadata are written in one `WriteBatch`, so a reader sees
//! either the previous record or the new one.

use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::{DocumentMetadata, DocumentStore, StoreError};
use crate::document::Content;

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches, for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// RocksDB document store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes writers so create-if-absent and metadata updates are atomic
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened document store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Content is already LZ4 compressed before it reaches RocksDB.
            CF_DOCUMENTS => {
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Force memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("Column family '{name}' not found")))
    }

    fn encode_meta(meta: &DocumentMetadata) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(meta, bincode::config::standard()).map_err(|e| {
            StoreError::Corrupt {
                id: meta.doc_id.clone(),
                reason: e.to_string(),
            }
        })
    }

    fn decode_meta(id: &str, bytes: &[u8]) -> Result<DocumentMetadata, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(meta)
    }

    /// Write content and metadata in one batch. Caller holds `write_lock`.
    fn write_record(&self, id: &str, content: &Content, mut meta: DocumentMetadata) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let raw = content.to_bytes();
        let compressed = lz4_flex::compress_prepend_size(&raw);
        meta.touch(raw.len(), compressed.len());

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, id.as_bytes(), Self::encode_meta(&meta)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

impl DocumentStore for RocksStore {
    fn get(&self, id: &str) -> Result<Option<Content>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let Some(compressed) = self.db.get_cf(&cf, id.as_bytes())? else {
            return Ok(None);
        };
        let raw = lz4_flex::decompress_size_prepended(&compressed).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        Content::from_bytes(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    fn create_if_absent(&self, id: &str, content: &Content) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_DOCUMENTS)?;
        if self.db.get_pinned_cf(&cf, id.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.write_record(id, content, DocumentMetadata::new(id))?;
        Ok(true)
    }

    fn save(&self, id: &str, content: &Content) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut meta = self
            .metadata(id)?
            .unwrap_or_else(|| DocumentMetadata::new(id));
        meta.save_count += 1;
        self.write_record(id, content, meta)
    }

    fn metadata(&self, id: &str) -> Result<Option<DocumentMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => Self::decode_meta(id, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_open() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
        assert!(store.list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_load_or_create_new_document() {
        let (_dir, store) = open_temp();

        let doc = store.load_or_create("doc42").unwrap();
        assert_eq!(doc.id, "doc42");
        assert_eq!(doc.content, Content::empty());

        let again = store.load_or_create("doc42").unwrap();
        assert_eq!(again.content, Content::empty());
        assert_eq!(store.list_documents().unwrap(), vec!["doc42".to_string()]);
        assert_eq!(store.metadata("doc42").unwrap().unwrap().save_count, 0);
    }

    #[test]
    fn test_concurrent_create_single_record() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.load_or_create("shared").unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().content, Content::empty());
        }

        assert_eq!(store.list_documents().unwrap().len(), 1);
    }

    #[test]
    fn test_save_replaces_content() {
        let (_dir, store) = open_temp();
        store.load_or_create("doc").unwrap();

        let x = Content::new(json!({ "ops": [{ "insert": "X\n" }] }));
        let y = Content::new(json!({ "ops": [{ "insert": "Y\n" }] }));
        store.save("doc", &x).unwrap();
        store.save("doc", &y).unwrap();

        assert_eq!(store.get("doc").unwrap(), Some(y));
        let meta = store.metadata("doc").unwrap().unwrap();
        assert_eq!(meta.save_count, 2);
        assert!(meta.updated_at >= meta.created_at);
    }

    #[test]
    fn test_content_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("db"));
        let content = Content::new(json!({ "ops": [{ "insert": "persisted\n" }] }));

        {
            let store = RocksStore::open(config.clone()).unwrap();
            store.save("doc", &content).unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(config).unwrap();
        assert_eq!(store.load_or_create("doc").unwrap().content, content);
    }

    #[test]
    fn test_content_is_compressed() {
        let (_dir, store) = open_temp();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(200);
        store.save("big", &Content::text(text)).unwrap();

        let meta = store.metadata("big").unwrap().unwrap();
        assert!(meta.stored_size < meta.content_size / 2);
    }

    #[test]
    fn test_documents_isolated() {
        let (_dir, store) = open_temp();
        store.save("a", &Content::text("alpha")).unwrap();
        store.save("b", &Content::text("beta")).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(Content::text("alpha")));
        assert_eq!(store.get("b").unwrap(), Some(Content::text("beta")));
        assert!(store.get("c").unwrap().is_none());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("doc".into());
        assert!(err.to_string().contains("not found"));

        let err = StoreError::Unavailable("io".into());
        assert!(err.to_string().contains("unavailable"));
    }
}
