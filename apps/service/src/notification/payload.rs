//! Alert text and destination-specific webhook bodies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use super::destination::DestinationKind;
use super::engine::AlertReason;
use crate::database::models::Target;
use crate::monitoring::types::Check;

const DISCORD_GREEN: u32 = 0x00FF00;
const DISCORD_RED: u32 = 0xFF0000;

/// Markdown alert body shared by every destination
pub fn format_message(target: &Target, check: &Check, reason: AlertReason) -> String {
    let emoji = if check.is_up { "✅" } else { "🔴" };
    let state = match (check.is_up, reason) {
        (true, _) => "IS NOW OPERATIONAL",
        (false, AlertReason::StatusChange) => "IS DOWN",
        (false, AlertReason::Reminder) => "IS STILL DOWN",
    };
    let error_info = check
        .error_message
        .as_deref()
        .map(|error| format!("\n> ❌ Error: {error}"))
        .unwrap_or_default();

    format!(
        "{emoji} **{name}** {state}\n\
         > 📍 URL: {url}\n\
         > 📊 HTTP Code: {code}\n\
         > ⏱️ Response Time: {response_time}\n\
         > 🕒 Detected at: {detected}{error_info}",
        name = target.name,
        url = target.url,
        code = check.status_code,
        response_time = check.response_time_label(),
        detected = iso(check.checked_at),
    )
}

/// JSON body for the given destination
pub fn build_payload(kind: DestinationKind, message: &str, is_up: bool, now: DateTime<Utc>) -> Value {
    match kind {
        DestinationKind::Teams => teams_payload(message, is_up),
        DestinationKind::Discord => discord_payload(message, is_up, now),
        DestinationKind::Slack => slack_payload(message, is_up),
    }
}

/// Slack / Mattermost attachment
fn slack_payload(message: &str, is_up: bool) -> Value {
    json!({
        "attachments": [{
            "color": if is_up { "good" } else { "danger" },
            "text": message,
            "mrkdwn_in": ["text"],
        }]
    })
}

/// Discord embed
fn discord_payload(message: &str, is_up: bool, now: DateTime<Utc>) -> Value {
    json!({
        "embeds": [{
            "description": message,
            "color": if is_up { DISCORD_GREEN } else { DISCORD_RED },
            "timestamp": iso(now),
        }]
    })
}

/// Microsoft Teams adaptive card
fn teams_payload(message: &str, is_up: bool) -> Value {
    json!({
        "type": "message",
        "attachments": [{
            "contentType": "application/vnd.microsoft.card.adaptive",
            "content": {
                "type": "AdaptiveCard",
                "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                "version": "1.4",
                "body": [{
                    "type": "TextBlock",
                    "text": message,
                    "wrap": true,
                    "size": "Medium",
                    "weight": "Bolder",
                    "color": if is_up { "good" } else { "attention" },
                }]
            }
        }]
    })
}

fn iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(is_up: bool, error: Option<&str>) -> (Target, Check) {
        let mut target = Target::new("Checkout".into(), "https://shop.example/health".into());
        target.id = Some(3);
        let check = Check {
            id: Some(10),
            target_id: 3,
            target_name: "Checkout".into(),
            status_code: if is_up { 200 } else { 0 },
            is_up,
            response_time: Duration::from_millis(87),
            error_message: error.map(str::to_string),
            checked_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        (target, check)
    }

    #[test]
    fn test_message_down_includes_error() {
        let (target, check) = sample(false, Some("Connection failed"));
        let message = format_message(&target, &check, AlertReason::StatusChange);

        assert!(message.starts_with("🔴 **Checkout** IS DOWN"));
        assert!(message.contains("URL: https://shop.example/health"));
        assert!(message.contains("HTTP Code: 0"));
        assert!(message.contains("Response Time: 87ms"));
        assert!(message.contains("Detected at: 2023-11-14T22:13:20Z"));
        assert!(message.ends_with("Error: Connection failed"));
    }

    #[test]
    fn test_message_up_and_reminder_labels() {
        let (target, check) = sample(true, None);
        let message = format_message(&target, &check, AlertReason::StatusChange);
        assert!(message.starts_with("✅ **Checkout** IS NOW OPERATIONAL"));
        assert!(!message.contains("Error"));

        let (target, check) = sample(false, None);
        let message = format_message(&target, &check, AlertReason::Reminder);
        assert!(message.contains("IS STILL DOWN"));
    }

    #[test]
    fn test_slack_payload() {
        let now = Utc::now();
        let down = build_payload(DestinationKind::Slack, "msg", false, now);
        assert_eq!(down["attachments"][0]["color"], "danger");
        assert_eq!(down["attachments"][0]["text"], "msg");
        assert_eq!(down["attachments"][0]["mrkdwn_in"][0], "text");

        let up = build_payload(DestinationKind::Slack, "msg", true, now);
        assert_eq!(up["attachments"][0]["color"], "good");
    }

    #[test]
    fn test_discord_payload() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let down = build_payload(DestinationKind::Discord, "msg", false, now);
        assert_eq!(down["embeds"][0]["color"], 0xFF0000);
        assert_eq!(down["embeds"][0]["description"], "msg");
        assert_eq!(down["embeds"][0]["timestamp"], "2023-11-14T22:13:20Z");

        let up = build_payload(DestinationKind::Discord, "msg", true, now);
        assert_eq!(up["embeds"][0]["color"], 0x00FF00);
    }

    #[test]
    fn test_teams_payload() {
        let payload = build_payload(DestinationKind::Teams, "msg", false, Utc::now());
        assert_eq!(payload["type"], "message");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["contentType"], "application/vnd.microsoft.card.adaptive");
        assert_eq!(attachment["content"]["type"], "AdaptiveCard");
        assert_eq!(attachment["content"]["body"][0]["text"], "msg");
        assert_eq!(attachment["content"]["body"][0]["color"], "attention");

        let up = build_payload(DestinationKind::Teams, "msg", true, Utc::now());
        assert_eq!(up["attachments"][0]["content"]["body"][0]["color"], "good");
    }
}
