use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::debug;

use super::types::CheckResult;

/// Timeout applied to every probe unless configured otherwise
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with every probe unless configured otherwise
pub const DEFAULT_USER_AGENT: &str = "Hawk-Monitor/1.0";

/// Performs one check against a monitor's target
///
/// Implementations never fail: every problem becomes a `down` result.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> CheckResult;
}

/// Single HTTP GET with a bounded timeout, no retries
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(user_agent).build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> CheckResult {
        let start = Instant::now();
        let response = self.client.get(url).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let status = response.status();
                // Consider 2xx and 3xx as success
                if status.is_success() || status.is_redirection() {
                    CheckResult::up(elapsed_ms, status.as_u16())
                } else {
                    let reason = status.canonical_reason().unwrap_or("Unknown Status");
                    CheckResult::down(format!("HTTP {}: {}", status.as_u16(), reason))
                        .with_response_time(elapsed_ms)
                        .with_status_code(status.as_u16())
                }
            }
            Err(e) => {
                debug!("Probe of {} failed after {}ms: {}", url, elapsed_ms, e);
                CheckResult::down(describe_transport_error(&e)).with_response_time(elapsed_ms)
            }
        }
    }
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("Request timed out: {error}")
    } else if error.is_connect() {
        format!("Connection failed: {error}")
    } else {
        error.to_string()
    }
}
