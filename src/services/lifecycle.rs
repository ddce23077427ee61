//! Event/media lifecycle orchestration.
//!
//! Neutralizing an event deletes its media first and commits the status
//! change last. A crash in between leaves the event active with missing
//! media, which a retried neutralize repairs; the reverse order would leave
//! orphaned media behind a record that claims to be clean.

use crate::db::models::{
    MediaBlob, NewThreatEvent, ThreatEvent, CONTENT_TYPE_CLIP, CONTENT_TYPE_SNAPSHOT,
};
use crate::db::repositories::{BlobStore, StatusFilter, ThreatEventStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

pub struct ThreatLifecycle {
    events: Arc<dyn ThreatEventStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ThreatLifecycle {
    pub fn new(events: Arc<dyn ThreatEventStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { events, blobs }
    }

    /// Ingest path used by the sensing process: store media first, then the
    /// record that references it.
    pub async fn record_detection(
        &self,
        mut event: NewThreatEvent,
        clip: Option<Vec<u8>>,
        snapshot: Option<Vec<u8>>,
    ) -> Result<ThreatEvent> {
        if let Some(bytes) = clip {
            event.clip_ref = Some(self.blobs.put(bytes, CONTENT_TYPE_CLIP).await?);
        }
        if let Some(bytes) = snapshot {
            event.snapshot_ref = Some(self.blobs.put(bytes, CONTENT_TYPE_SNAPSHOT).await?);
        }

        let stored = self.events.insert(event).await?;
        info!("Recorded threat event {}", stored.id);
        Ok(stored)
    }

    /// Recent events still requiring attention.
    pub async fn active_threats(&self) -> Result<Vec<ThreatEvent>> {
        self.events.list_recent(StatusFilter::Active).await
    }

    /// Recently neutralized events.
    pub async fn neutralized_threats(&self) -> Result<Vec<ThreatEvent>> {
        self.events.list_recent(StatusFilter::Neutralized).await
    }

    pub async fn find(&self, id: &str) -> Result<ThreatEvent> {
        self.events.find_by_id(id).await
    }

    pub async fn media(&self, reference: Uuid) -> Result<MediaBlob> {
        self.blobs.get(reference).await
    }

    /// Mark an event neutralized: delete its media, then update the record.
    ///
    /// Blob deletion failures are logged and skipped. The record may have
    /// been partially cleaned up by an earlier attempt, and a missing blob
    /// is no reason to refuse the operator.
    pub async fn neutralize(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let event = self.events.find_by_id(id).await?;

        if let Some(reference) = event.clip_ref {
            if let Err(e) = self.blobs.delete(reference).await {
                warn!("Failed to delete clip {} for event {}: {}", reference, id, e);
            }
        }
        if let Some(reference) = event.snapshot_ref {
            if let Err(e) = self.blobs.delete(reference).await {
                warn!(
                    "Failed to delete snapshot {} for event {}: {}",
                    reference, id, e
                );
            }
        }

        self.events.set_neutralized(id, now).await?;
        info!("Event {} neutralized", id);
        Ok(())
    }
}
