//! upwatch - HTTP uptime monitoring with webhook alerting
//!
//! A shared cycle probes every active target, stores the results, streams them
//! to live subscribers and feeds the notification engine.

pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod notification;
pub mod orchestrator;
pub mod pool;
pub mod validation;

pub use error::{ServiceError, ServiceResult};
pub use orchestrator::Orchestrator;
