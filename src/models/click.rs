use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single playback click on a video ad, as published by the ingress service.
///
/// The timestamp is assigned at ingress; consumers never rewrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub ad_id: String,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub playback_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ClickEvent {
    /// Unix seconds of the click, used as the recent-set score
    pub fn unix_seconds(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Unix nanoseconds of the click.
    ///
    /// Falls back to microsecond precision outside the range representable
    /// in an `i64` of nanoseconds.
    pub fn unix_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1000))
    }

    /// Member token for the recent-clicks ordered set.
    ///
    /// Distinct clicks sharing a second must not collapse into one member, so
    /// the token carries nanosecond precision.
    pub fn recent_member(&self) -> String {
        format!("{}-{}", self.ip, self.unix_nanos())
    }
}

/// Archived form of a click event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEventRecord {
    /// Store-generated identifier; `None` until the record has been inserted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub event: ClickEvent,
    pub processed_at: DateTime<Utc>,
}

impl StoredEventRecord {
    pub fn new(event: ClickEvent, processed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            event,
            processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_ingress_payload() {
        let payload = r#"{
            "ad_id": "ad1",
            "timestamp": "2024-03-05T10:15:30.123456789Z",
            "ip": "1.2.3.4",
            "playback_seconds": 10,
            "user_agent": "Mozilla/5.0"
        }"#;

        let event: ClickEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.ad_id, "ad1");
        assert_eq!(event.playback_seconds, 10);
        assert_eq!(event.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(event.unix_seconds(), 1_709_633_730);
        assert_eq!(event.recent_member(), "1.2.3.4-1709633730123456789");
    }

    #[test]
    fn test_negative_playback_is_rejected() {
        let payload = r#"{"ad_id":"ad1","timestamp":"2024-03-05T10:15:30Z","ip":"1.2.3.4","playback_seconds":-1}"#;
        assert!(serde_json::from_str::<ClickEvent>(payload).is_err());
    }

    #[test]
    fn test_user_agent_omitted_when_absent() {
        let event = ClickEvent {
            ad_id: "ad1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 30).unwrap(),
            ip: "1.2.3.4".to_string(),
            playback_seconds: 3,
            user_agent: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("user_agent"));
    }
}
