//! Service readiness polling.
//!
//! After the supervisor starts, the controller waits until every service in
//! the container answers HTTP. The wait is bounded and never fatal: on timeout
//! the bootstrap continues with whatever came up.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use url::Url;

/// A named HTTP endpoint that answers once its service is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: String,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Probing,
    Ready,
    TimedOut,
}

/// Checks one endpoint once.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, endpoint: &ServiceEndpoint) -> bool;
}

/// Waits between attempts. Swappable so tests do not sleep.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// HTTP probe: any 2xx or 3xx status counts as up. Redirects are not followed.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        // Services live inside the container; proxy settings must not apply.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, endpoint: &ServiceEndpoint) -> bool {
        let url = match Url::parse(&endpoint.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    service = %endpoint.name,
                    "Invalid endpoint URL {}: {}",
                    endpoint.url,
                    e
                );
                return false;
            }
        };

        match self.client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                let up = status.is_success() || status.is_redirection();
                if !up {
                    tracing::debug!(service = %endpoint.name, %status, "Service not ready");
                }
                up
            }
            Err(e) => {
                tracing::debug!(service = %endpoint.name, "Service not reachable: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct PollReport {
    pub state: ReadinessState,
    pub attempts: u32,
    /// Endpoints that failed in the last attempt.
    pub last_failures: Vec<String>,
}

impl PollReport {
    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }
}

/// Probe every endpoint once; `Ok` only if all of them answered.
async fn probe_all(probe: &dyn Probe, endpoints: &[ServiceEndpoint]) -> Result<(), Vec<String>> {
    let results = join_all(endpoints.iter().map(|ep| probe.check(ep))).await;
    let failed: Vec<String> = endpoints
        .iter()
        .zip(results)
        .filter(|(_, ok)| !ok)
        .map(|(ep, _)| ep.name.clone())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed)
    }
}

/// Poll until every endpoint is up in the same attempt or the attempt budget
/// runs out.
///
/// `should_continue` is consulted before each retry; returning `false` ends
/// polling early with [`ReadinessState::TimedOut`].
pub async fn wait_until_ready<F>(
    endpoints: &[ServiceEndpoint],
    probe: &dyn Probe,
    sleeper: &dyn Sleeper,
    policy: RetryPolicy,
    mut should_continue: F,
) -> PollReport
where
    F: FnMut() -> bool,
{
    let mut state = ReadinessState::Starting;
    tracing::debug!(?state, endpoints = endpoints.len(), "Waiting for services");

    let mut attempts = 0;
    let mut last_failures = Vec::new();

    while attempts < policy.max_attempts {
        if attempts > 0 {
            if !should_continue() {
                tracing::warn!(attempts, "Stopped waiting for services early");
                break;
            }
            sleeper.sleep(policy.interval).await;
        }

        attempts += 1;
        state = ReadinessState::Probing;

        match probe_all(probe, endpoints).await {
            Ok(()) => {
                tracing::info!(attempts, "All services are ready");
                return PollReport {
                    state: ReadinessState::Ready,
                    attempts,
                    last_failures: Vec::new(),
                };
            }
            Err(failed) => {
                tracing::debug!(attempt = attempts, pending = ?failed, "Services not ready yet");
                last_failures = failed;
            }
        }
    }

    tracing::debug!(?state, "Readiness polling finished without success");
    tracing::warn!(
        attempts,
        pending = ?last_failures,
        "Timed out waiting for services, continuing anyway"
    );
    PollReport {
        state: ReadinessState::TimedOut,
        attempts,
        last_failures,
    }
}
