use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Messaging integration a webhook URL points at.
///
/// Resolved once when a target is saved and persisted next to the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Microsoft Teams / Power Automate, adaptive card payload
    Teams,
    /// Discord embed payload
    Discord,
    /// Slack or Mattermost attachment payload
    Slack,
}

impl DestinationKind {
    /// Infer the integration from well-known host fragments. Unknown hosts are
    /// treated as Slack compatible.
    pub fn classify(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("teams") || url.contains("office.com") || url.contains("dynamics.com") {
            Self::Teams
        } else if url.contains("discord") {
            Self::Discord
        } else {
            Self::Slack
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teams => "teams",
            Self::Discord => "discord",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teams" => Ok(Self::Teams),
            "discord" => Ok(Self::Discord),
            "slack" | "mattermost" => Ok(Self::Slack),
            other => Err(format!("unknown webhook destination '{other}'")),
        }
    }
}
