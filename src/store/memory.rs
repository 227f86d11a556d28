use super::{ImageStore, PutOutcome, check_hash};
use crate::error::StoreError;
use crate::records::ImageRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Non-durable store for a single run
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    records: Mutex<HashMap<String, ImageRecord>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(&self, record: &ImageRecord) -> Result<PutOutcome, StoreError> {
        check_hash(record)?;

        let mut records = self.records.lock().await;
        if records.contains_key(&record.content_hash) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        records.insert(record.content_hash.clone(), record.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.lock().await.len() as u64)
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().await.clear();
        Ok(())
    }
}
