use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::notification::destination::DestinationKind;

pub type TargetId = i64;

/// Status code accepted when nothing (or nothing parsable) was configured
pub const DEFAULT_ACCEPTED_STATUS: u16 = 200;

/// Set of HTTP status codes that count as "up" for a target. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u16>", into = "Vec<u16>")]
pub struct AcceptedStatusCodes(BTreeSet<u16>);

impl AcceptedStatusCodes {
    /// Parse the comma separated storage form (`"200, 204"`).
    ///
    /// Blank input or any unparsable entry yields `{200}`.
    pub fn parse(raw: &str) -> Self {
        let parsed: Result<BTreeSet<u16>, _> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<u16>)
            .collect();

        match parsed {
            Ok(codes) => Self::from_codes(codes),
            Err(_) => Self::default(),
        }
    }

    pub fn from_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        let codes: BTreeSet<u16> = codes.into_iter().collect();
        if codes.is_empty() { Self::default() } else { Self(codes) }
    }

    pub fn contains(&self, status_code: u16) -> bool {
        self.0.contains(&status_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AcceptedStatusCodes {
    fn default() -> Self {
        Self(BTreeSet::from([DEFAULT_ACCEPTED_STATUS]))
    }
}

impl From<Vec<u16>> for AcceptedStatusCodes {
    fn from(codes: Vec<u16>) -> Self {
        Self::from_codes(codes)
    }
}

impl From<AcceptedStatusCodes> for Vec<u16> {
    fn from(codes: AcceptedStatusCodes) -> Self {
        codes.0.into_iter().collect()
    }
}

impl fmt::Display for AcceptedStatusCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

/// Outbound alert endpoint of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    pub kind: DestinationKind,
}

impl Webhook {
    /// Build from a configured URL, classifying the destination once.
    /// Blank URLs mean "no webhook".
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self { url: url.to_string(), kind: DestinationKind::classify(url) })
    }
}

/// Target model - a monitored endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: Option<TargetId>,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub accepted_status_codes: AcceptedStatusCodes,
    pub active: bool,
    pub webhook: Option<Webhook>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Create a new active target accepting only `200`
    pub fn new(name: String, url: String) -> Self {
        let now = now_millis();
        Self {
            id: None,
            name,
            category: None,
            description: None,
            url,
            accepted_status_codes: AcceptedStatusCodes::default(),
            active: true,
            webhook: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Debounce state of the alerting state machine for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationState {
    pub last_status_was_up: bool,
    pub last_notification_sent_at: Option<DateTime<Utc>>,
}

impl Default for NotificationState {
    /// A fresh target is assumed up until told otherwise
    fn default() -> Self {
        Self { last_status_was_up: true, last_notification_sent_at: None }
    }
}

/// Convert a UTC timestamp to epoch milliseconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a UTC timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Current time at storage precision
pub fn now_millis() -> DateTime<Utc> {
    i64_to_timestamp(timestamp_to_i64(Utc::now()))
}
