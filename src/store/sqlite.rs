use super::{ImageStore, PutOutcome, check_hash};
use crate::error::StoreError;
use crate::records::{ImageMetadata, ImageRecord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed image cache: one `images` table keyed by content hash
pub struct SqliteImageStore {
    pool: SqlitePool,
}

impl SqliteImageStore {
    /// Open (creating if needed) the cache database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        ::log::info!("Opened image cache at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // a single connection that never expires, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                content_hash TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                media_type TEXT NOT NULL,
                extension TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ImageStore for SqliteImageStore {
    async fn put(&self, record: &ImageRecord) -> Result<PutOutcome, StoreError> {
        check_hash(record)?;
        let metadata = serde_json::to_string(&record.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO images (content_hash, payload, media_type, extension, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&record.content_hash)
        .bind(&record.payload)
        .bind(&record.media_type)
        .bind(&record.extension)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(PutOutcome::AlreadyPresent)
        } else {
            Ok(PutOutcome::Inserted)
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let rows: Vec<(String, Vec<u8>, String, String, String)> = sqlx::query_as(
            "SELECT content_hash, payload, media_type, extension, metadata FROM images",
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|(content_hash, payload, media_type, extension, metadata)| {
                let metadata = serde_json::from_str::<ImageMetadata>(&metadata).unwrap_or_else(|e| {
                    ::log::warn!("Unreadable metadata for {}: {}", content_hash, e);
                    ImageMetadata::default()
                });
                ImageRecord {
                    content_hash,
                    payload,
                    media_type,
                    extension,
                    metadata,
                }
            })
            .collect::<Vec<_>>();

        ::log::debug!("Retrieved {} images from cache", records.len());
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM images").execute(&self.pool).await?;
        Ok(())
    }
}
