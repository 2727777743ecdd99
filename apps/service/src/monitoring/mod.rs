/// Monitoring engine module - probes targets and reports on their history
///
/// This module is responsible for:
/// - Executing HTTP checks and classifying them against accept-lists
/// - Driving the shared periodic cycle and its live feed
/// - Computing windowed uptime from stored checks
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod types;
pub mod uptime;

#[cfg(test)]
pub(crate) mod test_support;

pub use executor::ProbeExecutor;
pub use scheduler::{CycleScheduler, LiveFeed, SchedulerSettings};
pub use types::Check;
pub use uptime::{UptimeCalculator, UptimeStats};
