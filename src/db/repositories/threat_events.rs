use crate::crypto::FieldCodec;
use crate::db::models::{NewThreatEvent, ThreatEvent, ThreatStatus};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Which class of events a recency query returns. Each standing query
/// carries its own cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Active,
    Neutralized,
}

impl StatusFilter {
    pub fn cap(&self) -> i64 {
        match self {
            Self::Active => 200,
            Self::Neutralized => 500,
        }
    }
}

/// Store of threat event records. Sensitive fields are encoded on write and
/// decoded on read here, not by callers.
#[async_trait]
pub trait ThreatEventStore: Send + Sync {
    /// Persist a new detection, assigning its id and timestamp.
    async fn insert(&self, event: NewThreatEvent) -> Result<ThreatEvent>;

    /// Most recent events matching the filter, newest first, capped.
    async fn list_recent(&self, filter: StatusFilter) -> Result<Vec<ThreatEvent>>;

    /// Look up one event. A malformed id yields `InvalidId`; a well-formed
    /// id with no record yields `NotFound`.
    async fn find_by_id(&self, id: &str) -> Result<ThreatEvent>;

    /// Mark an event neutralized at `now` and clear its blob references.
    /// Idempotent: repeating the call on a neutralized event changes nothing.
    async fn set_neutralized(&self, id: &str, now: DateTime<Utc>) -> Result<()>;
}

/// Parse a client-supplied event identifier.
pub fn parse_event_id(id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(id).map_err(|_| Error::InvalidId(format!("Malformed event id: {}", id)))
}

/// Threat events repository backed by the threat_events table
#[derive(Clone)]
pub struct ThreatEventsRepository {
    pool: Arc<PgPool>,
    codec: Arc<FieldCodec>,
}

impl ThreatEventsRepository {
    /// Create a new threat events repository
    pub fn new(pool: Arc<PgPool>, codec: Arc<FieldCodec>) -> Self {
        Self { pool, codec }
    }

    fn decode_event(&self, mut event: ThreatEvent) -> ThreatEvent {
        event.description = self.codec.decode_opt(event.description);
        event.officer = self.codec.decode_opt(event.officer);
        event
    }
}

#[async_trait]
impl ThreatEventStore for ThreatEventsRepository {
    async fn insert(&self, event: NewThreatEvent) -> Result<ThreatEvent> {
        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let status = ThreatStatus::Active.as_str();

        let description = self.codec.encode_opt(event.description.as_deref())?;
        let officer = self.codec.encode_opt(event.officer.as_deref())?;

        sqlx::query(
            r#"
            INSERT INTO threat_events (
                id, description, officer, location, camera, status,
                clip_ref, snapshot_ref, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(&description)
        .bind(&officer)
        .bind(&event.location)
        .bind(&event.camera)
        .bind(status)
        .bind(event.clip_ref)
        .bind(event.snapshot_ref)
        .bind(timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert event: {}", e)))?;

        Ok(ThreatEvent {
            id,
            description: event.description,
            officer: event.officer,
            location: event.location,
            camera: event.camera,
            status: status.to_string(),
            clip_ref: event.clip_ref,
            snapshot_ref: event.snapshot_ref,
            timestamp,
            neutralized_at: None,
        })
    }

    async fn list_recent(&self, filter: StatusFilter) -> Result<Vec<ThreatEvent>> {
        // Status is matched on the "Neutral" substring, the convention the
        // operator UI has always relied on.
        let sql = match filter {
            StatusFilter::Active => {
                r#"
                SELECT id, description, officer, location, camera, status,
                       clip_ref, snapshot_ref, timestamp, neutralized_at
                FROM threat_events
                WHERE status NOT LIKE '%Neutral%'
                ORDER BY timestamp DESC
                LIMIT $1
                "#
            }
            StatusFilter::Neutralized => {
                r#"
                SELECT id, description, officer, location, camera, status,
                       clip_ref, snapshot_ref, timestamp, neutralized_at
                FROM threat_events
                WHERE status LIKE '%Neutral%'
                ORDER BY timestamp DESC
                LIMIT $1
                "#
            }
        };

        let events = sqlx::query_as::<_, ThreatEvent>(sql)
            .bind(filter.cap())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list events: {}", e)))?;

        Ok(events.into_iter().map(|e| self.decode_event(e)).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<ThreatEvent> {
        let event_id = parse_event_id(id)?;

        let event = sqlx::query_as::<_, ThreatEvent>(
            r#"
            SELECT id, description, officer, location, camera, status,
                   clip_ref, snapshot_ref, timestamp, neutralized_at
            FROM threat_events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to fetch event: {}", e)))?;

        let event = event.ok_or_else(|| Error::NotFound(format!("Event not found: {}", id)))?;
        Ok(self.decode_event(event))
    }

    async fn set_neutralized(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let event_id = parse_event_id(id)?;

        let result = sqlx::query(
            r#"
            UPDATE threat_events
            SET status = $2, neutralized_at = $3, clip_ref = NULL, snapshot_ref = NULL
            WHERE id = $1 AND status NOT LIKE '%Neutral%'
            "#,
        )
        .bind(event_id)
        .bind(ThreatStatus::Neutralized.as_str())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update event status: {}", e)))?;

        if result.rows_affected() == 0 {
            // Either the record is already neutralized (fine, the operation
            // is idempotent) or it does not exist at all.
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM threat_events WHERE id = $1)",
            )
            .bind(event_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to check event existence: {}", e)))?;

            if !exists {
                return Err(Error::NotFound(format!("Event not found: {}", id)).into());
            }

            debug!("Event {} already neutralized, nothing to update", id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use sqlx::postgres::PgPoolOptions;

    // Integration tests against a live database. Set TEST_DATABASE_URL to run.
    async fn test_pool() -> Option<Arc<PgPool>> {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                println!("Skipping database test. Set TEST_DATABASE_URL to run.");
                return None;
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to test database");
        migrations::run_migrations(&pool).await.expect("migrations");
        Some(Arc::new(pool))
    }

    fn repo(pool: Arc<PgPool>) -> ThreatEventsRepository {
        ThreatEventsRepository::new(pool, Arc::new(FieldCodec::disabled()))
    }

    #[tokio::test]
    async fn test_malformed_id_is_invalid_not_missing() {
        // Pure parse path, no database needed
        let err = parse_event_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let Some(pool) = test_pool().await else { return };
        let repo = repo(pool);

        let inserted = repo
            .insert(NewThreatEvent {
                description: Some("pistol detected".to_string()),
                camera: Some("cam-07".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = repo.find_by_id(&inserted.id.to_string()).await.unwrap();
        assert_eq!(found.description.as_deref(), Some("pistol detected"));
        assert_eq!(found.status, "Active");
        assert!(found.neutralized_at.is_none());
    }

    #[tokio::test]
    async fn test_find_unknown_id_is_not_found() {
        let Some(pool) = test_pool().await else { return };
        let repo = repo(pool);

        let err = repo
            .find_by_id(&Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_neutralized_is_idempotent() {
        let Some(pool) = test_pool().await else { return };
        let repo = repo(pool);

        let event = repo
            .insert(NewThreatEvent {
                description: Some("rifle detected".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = event.id.to_string();

        let now = Utc::now();
        repo.set_neutralized(&id, now).await.unwrap();

        let after_first = repo.find_by_id(&id).await.unwrap();
        assert!(after_first.is_neutralized());
        assert!(after_first.neutralized_at.is_some());
        assert!(after_first.clip_ref.is_none());

        // Second call succeeds and does not move neutralized_at
        repo.set_neutralized(&id, Utc::now()).await.unwrap();
        let after_second = repo.find_by_id(&id).await.unwrap();
        assert_eq!(after_first.neutralized_at, after_second.neutralized_at);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let Some(pool) = test_pool().await else { return };
        let repo = repo(pool);

        for i in 0..3 {
            repo.insert(NewThreatEvent {
                description: Some(format!("ordering probe {}", i)),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let events = repo.list_recent(StatusFilter::Active).await.unwrap();
        assert!(events.len() >= 3);
        assert!(events.len() as i64 <= StatusFilter::Active.cap());
        for pair in events.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
}
