//! In-process document store.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DocumentMetadata, DocumentStore, StoreError};
use crate::document::Content;

struct Record {
    content: Content,
    meta: DocumentMetadata,
}

/// Volatile store used when no storage path is configured, and in tests.
pub struct MemoryStore {
    records: RwLock<HashMap<String, Record>>,
    creations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            creations: AtomicU64::new(0),
        }
    }

    /// Number of records created since the store was opened.
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Content>, StoreError> {
        Ok(self.records.read().get(id).map(|r| r.content.clone()))
    }

    fn create_if_absent(&self, id: &str, content: &Content) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        if records.contains_key(id) {
            return Ok(false);
        }
        let size = content.to_bytes().len();
        let mut meta = DocumentMetadata::new(id);
        meta.touch(size, size);
        records.insert(
            id.to_string(),
            Record {
                content: content.clone(),
                meta,
            },
        );
        self.creations.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn save(&self, id: &str, content: &Content) -> Result<(), StoreError> {
        let size = content.to_bytes().len();
        let mut records = self.records.write();
        let record = records.entry(id.to_string()).or_insert_with(|| {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Record {
                content: Content::empty(),
                meta: DocumentMetadata::new(id),
            }
        });
        record.content = content.clone();
        record.meta.save_count += 1;
        record.meta.touch(size, size);
        Ok(())
    }

    fn metadata(&self, id: &str) -> Result<Option<DocumentMetadata>, StoreError> {
        Ok(self.records.read().get(id).map(|r| r.meta.clone()))
    }

    fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
