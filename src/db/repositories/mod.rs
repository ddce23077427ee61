pub mod media_blobs;
pub mod threat_events;

pub use media_blobs::{BlobStore, MediaBlobsRepository};
pub use threat_events::{StatusFilter, ThreatEventStore, ThreatEventsRepository};
