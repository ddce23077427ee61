use crate::db::models::MediaBlob;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Content-addressed store for binary media (clips, snapshots).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its reference.
    async fn put(&self, data: Vec<u8>, content_type: &str) -> Result<Uuid>;

    /// Fetch a blob by reference.
    async fn get(&self, id: Uuid) -> Result<MediaBlob>;

    /// Delete a blob. Deleting a reference that does not exist is a no-op,
    /// so a retried neutralize cannot fail here.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Media blobs repository backed by the media_blobs table
#[derive(Clone)]
pub struct MediaBlobsRepository {
    pool: Arc<PgPool>,
}

impl MediaBlobsRepository {
    /// Create a new media blobs repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStore for MediaBlobsRepository {
    async fn put(&self, data: Vec<u8>, content_type: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO media_blobs (id, content_type, data, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(content_type)
        .bind(&data)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to store blob: {}", e)))?;

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<MediaBlob> {
        let blob = sqlx::query_as::<_, MediaBlob>(
            r#"
            SELECT id, content_type, data, created_at
            FROM media_blobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to fetch blob: {}", e)))?;

        blob.ok_or_else(|| Error::NotFound(format!("Blob not found: {}", id)).into())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM media_blobs WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete blob: {}", e)))?;

        if result.rows_affected() == 0 {
            debug!("Blob {} already absent, nothing to delete", id);
        }

        Ok(())
    }
}
