use anyhow::{Result, anyhow};
use std::error::Error as StdError;
use std::time::Duration;

/// What came back from the endpoint, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutcome {
    pub status_code: u16,
    /// Canonical reason phrase of the status, if any
    pub reason: Option<String>,
}

/// Issues one request against a URL. Any returned error is a transport failure.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, url: &str) -> Result<HttpOutcome>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// Redirects are reported as-is so a 301/302 can be accepted or rejected
    /// by the target's accept-list
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, url: &str) -> Result<HttpOutcome> {
        let response = self.client.get(url).send().await.map_err(|e| anyhow!(describe(&e)))?;

        let status = response.status();
        Ok(HttpOutcome {
            status_code: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
        })
    }
}

/// Flatten a reqwest error and its causes into one line
fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "Request timed out".to_string();
    }

    let mut message = if error.is_connect() {
        "Connection failed".to_string()
    } else {
        // reqwest embeds the URL, which the target already carries
        let text = error.to_string();
        text.split(" for url (").next().unwrap_or_default().to_string()
    };

    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
