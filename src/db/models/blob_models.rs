use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type recorded for stored video clips
pub const CONTENT_TYPE_CLIP: &str = "video/mp4";

/// Content type recorded for stored snapshots
pub const CONTENT_TYPE_SNAPSHOT: &str = "image/jpeg";

/// Media blob model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaBlob {
    pub id: Uuid,
    pub content_type: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}
