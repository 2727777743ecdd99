use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::models::{Target, TargetId};

/// Upper bound (in characters) of the error text stored on a check
pub const MAX_ERROR_LEN: usize = 100;

/// Status code recorded when no HTTP response was received
pub const TRANSPORT_FAILURE_CODE: u16 = 0;

/// Outcome of one probe against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    /// Row id, assigned once persisted
    pub id: Option<i64>,

    pub target_id: TargetId,

    /// Name of the target at the time of the check
    pub target_name: String,

    /// HTTP status code, `0` when the request never got a response
    pub status_code: u16,

    pub is_up: bool,

    /// Wall time between sending the request and receiving the status line
    #[serde(with = "response_time")]
    pub response_time: Duration,

    pub error_message: Option<String>,

    pub checked_at: DateTime<Utc>,
}

impl Check {
    /// Classify a received HTTP response against the target's accept-list
    pub fn from_response(
        target: &Target,
        status_code: u16,
        response_time: Duration,
        reason: Option<&str>,
    ) -> Self {
        let is_up = target.accepted_status_codes.contains(status_code);
        Self {
            id: None,
            target_id: target.id.unwrap_or_default(),
            target_name: target.name.clone(),
            status_code,
            is_up,
            response_time,
            error_message: if is_up { None } else { reason.map(truncate_error) },
            checked_at: Utc::now(),
        }
    }

    /// Record a timeout or connection failure
    pub fn from_failure(target: &Target, response_time: Duration, error: &str) -> Self {
        let error_message =
            if error.trim().is_empty() { "Connection failed".to_string() } else { truncate_error(error) };
        Self {
            id: None,
            target_id: target.id.unwrap_or_default(),
            target_name: target.name.clone(),
            status_code: TRANSPORT_FAILURE_CODE,
            is_up: false,
            response_time,
            error_message: Some(error_message),
            checked_at: Utc::now(),
        }
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time.as_millis() as u64
    }

    /// Human readable response time, e.g. `"142ms"`
    pub fn response_time_label(&self) -> String {
        format!("{}ms", self.response_time_ms())
    }
}

/// Keep at most [`MAX_ERROR_LEN`] characters, never splitting a code point
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Serializes a [`Duration`] as a millisecond string with unit (`"142ms"`)
pub mod response_time {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let millis = raw
            .trim()
            .strip_suffix("ms")
            .ok_or_else(|| de::Error::custom(format!("missing 'ms' unit in {raw:?}")))?
            .trim()
            .parse::<u64>()
            .map_err(de::Error::custom)?;
        Ok(Duration::from_millis(millis))
    }
}
