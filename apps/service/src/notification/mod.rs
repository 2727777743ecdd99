/// Webhook alerting
///
/// Turns status transitions and sustained outages into chat notifications
/// for Slack (and compatible), Discord and Microsoft Teams.
pub mod destination;
pub mod engine;
pub mod payload;
pub mod sender;

pub use destination::DestinationKind;
pub use engine::{AlertReason, NotificationEngine, NotificationSettings, Outcome, SweepReport};
pub use sender::{HttpWebhookSender, SenderError, WebhookSender};
