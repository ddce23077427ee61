use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Schema migrations, applied in order on startup.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_threat_events",
        r#"
        CREATE TABLE IF NOT EXISTS threat_events (
            id UUID PRIMARY KEY,
            description TEXT,
            officer TEXT,
            location TEXT,
            camera TEXT,
            status TEXT NOT NULL DEFAULT 'Active',
            clip_ref UUID,
            snapshot_ref UUID,
            timestamp TIMESTAMPTZ NOT NULL,
            neutralized_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "002_create_media_blobs",
        r#"
        CREATE TABLE IF NOT EXISTS media_blobs (
            id UUID PRIMARY KEY,
            content_type TEXT NOT NULL,
            data BYTEA NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "003_add_timestamp_index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_threat_events_timestamp
            ON threat_events (timestamp DESC)
        "#,
    ),
    (
        "004_add_status_index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_threat_events_status
            ON threat_events (status)
        "#,
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
