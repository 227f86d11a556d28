//! Content-addressed image cache.
//!
//! Records are keyed by the SHA-256 of their bytes. A second `put` for a hash
//! already present is a no-op: the first capture's metadata is kept.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryImageStore;
pub use sqlite::SqliteImageStore;

use crate::error::StoreError;
use crate::records::ImageRecord;
use async_trait::async_trait;

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The hash was new and the record was stored
    Inserted,
    /// A record with this hash already existed and was left untouched
    AlreadyPresent,
}

/// Durable key-value store of image records keyed by content hash
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Insert a record unless its hash is already present
    async fn put(&self, record: &ImageRecord) -> Result<PutOutcome, StoreError>;

    /// Number of distinct hashes stored
    async fn count(&self) -> Result<u64, StoreError>;

    /// Every stored record, in no particular order
    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// Remove all records
    async fn clear(&self) -> Result<(), StoreError>;
}

fn check_hash(record: &ImageRecord) -> Result<(), StoreError> {
    if record.content_hash.trim().is_empty() {
        return Err(StoreError::MissingHash(record.metadata.image_id.clone()));
    }
    Ok(())
}
