use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Threat event model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThreatEvent {
    pub id: Uuid,
    pub description: Option<String>,
    pub officer: Option<String>,
    pub location: Option<String>,
    pub camera: Option<String>,
    pub status: String,
    pub clip_ref: Option<Uuid>,
    pub snapshot_ref: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub neutralized_at: Option<DateTime<Utc>>,
}

impl ThreatEvent {
    pub fn is_neutralized(&self) -> bool {
        ThreatStatus::classify(&self.status) == ThreatStatus::Neutralized
    }
}

/// A detection handed in by the sensing process, before the store assigns
/// an id and timestamp. Blob references are filled in once media is stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewThreatEvent {
    pub description: Option<String>,
    pub officer: Option<String>,
    pub location: Option<String>,
    pub camera: Option<String>,
    pub clip_ref: Option<Uuid>,
    pub snapshot_ref: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatStatus {
    Active,
    Neutralized,
}

impl ThreatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Neutralized => "Neutralized",
        }
    }

    /// Classify a stored status string. Any value containing "Neutral" counts
    /// as neutralized; this substring convention is the wire contract and has
    /// to keep matching records written by earlier deployments.
    pub fn classify(status: &str) -> Self {
        if status.contains("Neutral") {
            Self::Neutralized
        } else {
            Self::Active
        }
    }
}

impl std::fmt::Display for ThreatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of an event in list/detail responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEventSummary {
    pub id: String,
    pub description: String,
    pub status: String,
    pub officer: Option<String>,
    pub location: Option<String>,
    pub camera: Option<String>,
    pub clip_ref: Option<String>,
    pub snapshot_ref: Option<String>,
    pub timestamp: String,
}

impl From<ThreatEvent> for ThreatEventSummary {
    fn from(event: ThreatEvent) -> Self {
        Self {
            id: event.id.to_string(),
            description: event
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "N/A".to_string()),
            status: event.status,
            officer: event.officer,
            location: event.location,
            camera: event.camera,
            clip_ref: event.clip_ref.map(|r| r.to_string()),
            snapshot_ref: event.snapshot_ref.map(|r| r.to_string()),
            timestamp: event.timestamp.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> ThreatEvent {
        ThreatEvent {
            id: Uuid::new_v4(),
            description: None,
            officer: Some("Officer Rao".to_string()),
            location: Some("Gate 3".to_string()),
            camera: Some("cam-01".to_string()),
            status: "Active".to_string(),
            clip_ref: Some(Uuid::new_v4()),
            snapshot_ref: None,
            timestamp: Utc::now(),
            neutralized_at: None,
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ThreatStatus::classify("Active"), ThreatStatus::Active);
        assert_eq!(
            ThreatStatus::classify("Neutralized"),
            ThreatStatus::Neutralized
        );
        // Substring match is the historical wire convention
        assert_eq!(
            ThreatStatus::classify("Threat Neutralized by patrol"),
            ThreatStatus::Neutralized
        );
        assert_eq!(ThreatStatus::classify(""), ThreatStatus::Active);
    }

    #[test]
    fn test_summary_description_fallback() {
        let summary = ThreatEventSummary::from(sample_event());
        assert_eq!(summary.description, "N/A");
    }

    #[test]
    fn test_summary_wire_field_names() {
        let event = sample_event();
        let clip_ref = event.clip_ref.unwrap().to_string();

        let json = serde_json::to_value(ThreatEventSummary::from(event)).unwrap();
        assert_eq!(json["clipRef"], serde_json::json!(clip_ref));
        assert!(json["snapshotRef"].is_null());
        assert_eq!(json["status"], "Active");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
