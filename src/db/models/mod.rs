pub mod blob_models;
pub mod threat_event_models;

pub use blob_models::{MediaBlob, CONTENT_TYPE_CLIP, CONTENT_TYPE_SNAPSHOT};
pub use threat_event_models::{NewThreatEvent, ThreatEvent, ThreatEventSummary, ThreatStatus};
