//! Counter key derivation
//!
//! Every key is a pure function of the ad identifier, the event timestamp and
//! the resolution, so replaying an event always touches the same keys.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::ClickEvent;

/// Cache key holding the serialized ad list
pub const ADS_CACHE_KEY: &str = "ads:all";

pub const TOTAL_TTL: Duration = Duration::from_secs(24 * 3600);
pub const RECENT_TTL: Duration = Duration::from_secs(3600);

/// Time-bucketed counter granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    Hour,
    Day,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Minute, Resolution::Hour, Resolution::Day];

    fn prefix(self) -> &'static str {
        match self {
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }

    fn bucket_format(self) -> &'static str {
        match self {
            Resolution::Minute => "%Y%m%d%H%M",
            Resolution::Hour => "%Y%m%d%H",
            Resolution::Day => "%Y%m%d",
        }
    }

    /// How long a bucket counter is retained after its last increment
    pub fn ttl(self) -> Duration {
        match self {
            Resolution::Minute => Duration::from_secs(3600),
            Resolution::Hour => Duration::from_secs(24 * 3600),
            Resolution::Day => Duration::from_secs(7 * 24 * 3600),
        }
    }

    /// Width of one bucket
    pub fn step(self) -> ChronoDuration {
        match self {
            Resolution::Minute => ChronoDuration::minutes(1),
            Resolution::Hour => ChronoDuration::hours(1),
            Resolution::Day => ChronoDuration::days(1),
        }
    }

    /// Bucket label for a timestamp, formatted in UTC
    pub fn bucket(self, at: DateTime<Utc>) -> String {
        at.format(self.bucket_format()).to_string()
    }

    /// `<resolution>:<ad_id>:<bucket>`
    pub fn key(self, ad_id: &str, at: DateTime<Utc>) -> String {
        format!("{}:{}:{}", self.prefix(), ad_id, self.bucket(at))
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            other => Err(format!(
                "unknown resolution '{other}', expected minute, hour or day"
            )),
        }
    }
}

pub fn total_key(ad_id: &str) -> String {
    format!("total:{ad_id}")
}

pub fn recent_key(ad_id: &str) -> String {
    format!("recent:{ad_id}")
}

pub fn dedup_key(token: &str) -> String {
    format!("dedup:{token}")
}

/// The full key set touched by one click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKeys {
    pub total: String,
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub recent: String,
}

impl CounterKeys {
    pub fn for_event(event: &ClickEvent) -> Self {
        Self::new(&event.ad_id, event.timestamp)
    }

    pub fn new(ad_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            total: total_key(ad_id),
            minute: Resolution::Minute.key(ad_id, at),
            hour: Resolution::Hour.key(ad_id, at),
            day: Resolution::Day.key(ad_id, at),
            recent: recent_key(ad_id),
        }
    }

    /// Integer counters paired with their retention
    pub fn counters(&self) -> [(&str, Duration); 4] {
        [
            (self.total.as_str(), TOTAL_TTL),
            (self.minute.as_str(), Resolution::Minute.ttl()),
            (self.hour.as_str(), Resolution::Hour.ttl()),
            (self.day.as_str(), Resolution::Day.ttl()),
        ]
    }
}
