use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::checker::{Checker, HttpChecker};
use super::types::Check;
use crate::database::models::Target;

/// Probe executor - turns one request against one target into one [`Check`]
///
/// No retries happen here; the next cycle is the retry.
pub struct ProbeExecutor {
    checker: Arc<dyn Checker>,
    timeout: Duration,
}

impl ProbeExecutor {
    /// Create an executor issuing HTTP GETs with the given timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_checker(Arc::new(HttpChecker::new(timeout)?), timeout))
    }

    pub fn with_checker(checker: Arc<dyn Checker>, timeout: Duration) -> Self {
        Self { checker, timeout }
    }

    /// Probe a target. Never fails: transport problems become a DOWN check
    /// with status code `0`.
    pub async fn probe(&self, target: &Target) -> Check {
        debug!(target_id = ?target.id, url = %target.url, "Checking target");
        let start = Instant::now();

        let outcome = timeout(self.timeout, self.checker.check(&target.url)).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(response)) => {
                let check = Check::from_response(
                    target,
                    response.status_code,
                    elapsed,
                    response.reason.as_deref(),
                );
                debug!(
                    target_id = ?target.id,
                    status_code = check.status_code,
                    is_up = check.is_up,
                    "Probe for {} answered in {}",
                    target.name,
                    check.response_time_label()
                );
                check
            }
            Ok(Err(e)) => {
                warn!(target_id = ?target.id, "Error checking {}: {}", target.url, e);
                Check::from_failure(target, elapsed, &e.to_string())
            }
            Err(_) => {
                warn!(target_id = ?target.id, "Probe of {} timed out", target.url);
                let message = format!("Request timed out after {}ms", self.timeout.as_millis());
                Check::from_failure(target, elapsed, &message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::AcceptedStatusCodes;
    use crate::monitoring::checker::HttpOutcome;
    use crate::monitoring::test_support::{closed_port_url, serve_status};
    use crate::monitoring::types::{MAX_ERROR_LEN, TRANSPORT_FAILURE_CODE};

    fn target(url: String, accepted: &str) -> Target {
        let mut target = Target::new("svc".into(), url);
        target.id = Some(1);
        target.accepted_status_codes = AcceptedStatusCodes::parse(accepted);
        target
    }

    struct SlowChecker;

    #[async_trait::async_trait]
    impl Checker for SlowChecker {
        async fn check(&self, _url: &str) -> Result<HttpOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(HttpOutcome { status_code: 200, reason: None })
        }
    }

    #[tokio::test]
    async fn test_ok_response_is_up() {
        let url = serve_status("200 OK").await;
        let executor = ProbeExecutor::new(Duration::from_secs(5)).unwrap();

        let check = executor.probe(&target(url, "200")).await;
        assert_eq!(check.status_code, 200);
        assert!(check.is_up);
        assert!(check.error_message.is_none());
    }

    #[tokio::test]
    async fn test_not_found_is_down_unless_accepted() {
        let url = serve_status("404 Not Found").await;
        let executor = ProbeExecutor::new(Duration::from_secs(5)).unwrap();

        let check = executor.probe(&target(url.clone(), "200")).await;
        assert_eq!(check.status_code, 404);
        assert!(!check.is_up);
        assert_eq!(check.error_message.as_deref(), Some("Not Found"));

        let check = executor.probe(&target(url, "200,404")).await;
        assert!(check.is_up);
    }

    #[tokio::test]
    async fn test_server_error_is_down() {
        let url = serve_status("500 Internal Server Error").await;
        let executor = ProbeExecutor::new(Duration::from_secs(5)).unwrap();

        let check = executor.probe(&target(url, "200")).await;
        assert_eq!(check.status_code, 500);
        assert!(!check.is_up);
    }

    #[tokio::test]
    async fn test_redirect_not_followed() {
        let url = serve_status("302 Found").await;
        let executor = ProbeExecutor::new(Duration::from_secs(5)).unwrap();

        let check = executor.probe(&target(url, "302")).await;
        assert_eq!(check.status_code, 302);
        assert!(check.is_up);
    }

    #[tokio::test]
    async fn test_connection_refused_is_code_zero() {
        let url = closed_port_url().await;
        let executor = ProbeExecutor::new(Duration::from_secs(5)).unwrap();

        let check = executor.probe(&target(url, "200")).await;
        assert_eq!(check.status_code, TRANSPORT_FAILURE_CODE);
        assert!(!check.is_up);
        let message = check.error_message.unwrap();
        assert!(!message.is_empty());
        assert!(message.chars().count() <= MAX_ERROR_LEN);
    }

    #[tokio::test]
    async fn test_timeout_is_code_zero() {
        let executor =
            ProbeExecutor::with_checker(Arc::new(SlowChecker), Duration::from_millis(50));

        let check = executor.probe(&target("http://slow.invalid".into(), "200")).await;
        assert_eq!(check.status_code, TRANSPORT_FAILURE_CODE);
        assert!(!check.is_up);
        assert_eq!(check.error_message.as_deref(), Some("Request timed out after 50ms"));
        assert!(check.response_time < Duration::from_secs(5));
    }
}
