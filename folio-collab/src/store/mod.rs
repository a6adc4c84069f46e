//! Durable `{document id → content}` persistence.
//!
//! ```text
//! ┌───────────────────┐   load_or_create / save   ┌───────────────┐
//! │ SessionCoordinator│ ────────────────────────► │ DocumentStore │
//! │ HTTP handlers     │                           └───────┬───────┘
//! └───────────────────┘                                   │
//!                                           ┌─────────────┴─────────────┐
//!                                           ▼                           ▼
//!                                    RocksStore (disk)          MemoryStore
//!                                    CF "documents" (LZ4)
//!                                    CF "metadata"
//! ```
//!
//! Saves are full replacements, last writer wins. There is no merge and no
//! version check: a stale client overwrites newer content silently.

pub mod memory;
pub mod rocks;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

use crate::document::{Content, Document};

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unreachable or failing
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),
    /// Stored bytes could not be decoded
    #[error("Corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Bookkeeping kept alongside each document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    /// Number of full-content saves since creation
    pub save_count: u64,
    /// Uncompressed content size in bytes
    pub content_size: u64,
    /// Size as written by the backend
    pub stored_size: u64,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl DocumentMetadata {
    pub(crate) fn new(doc_id: &str) -> Self {
        let now = now_secs();
        Self {
            doc_id: doc_id.to_string(),
            save_count: 0,
            content_size: 0,
            stored_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self, content_size: usize, stored_size: usize) {
        self.content_size = content_size as u64;
        self.stored_size = stored_size as u64;
        self.updated_at = now_secs();
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Document persistence backend.
///
/// Implementations must be safe to call from many sessions at once and must
/// never expose a partially written record.
pub trait DocumentStore: Send + Sync {
    /// Fetch stored content, `None` if the document was never created.
    fn get(&self, id: &str) -> Result<Option<Content>, StoreError>;

    /// Create the record unless one exists. Returns `true` only for the
    /// caller whose create took effect.
    fn create_if_absent(&self, id: &str, content: &Content) -> Result<bool, StoreError>;

    /// Replace the full content, creating the record if needed.
    fn save(&self, id: &str, content: &Content) -> Result<(), StoreError>;

    fn metadata(&self, id: &str) -> Result<Option<DocumentMetadata>, StoreError>;

    fn list_documents(&self) -> Result<Vec<String>, StoreError>;

    /// Load a document, creating it with empty content on first access.
    ///
    /// Concurrent callers for the same id agree on one record: whoever loses
    /// the create race re-fetches what the winner wrote.
    fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        if let Some(content) = self.get(id)? {
            return Ok(Document::new(id, content));
        }

        let empty = Content::empty();
        if self.create_if_absent(id, &empty)? {
            log::info!("Created document {id}");
            return Ok(Document::new(id, empty));
        }

        log::debug!("Lost create race for {id}, re-fetching");
        self.get(id)?
            .map(|content| Document::new(id, content))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
