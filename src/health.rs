//! Application health polling against a freshly booted droplet.
//!
//! A droplet whose boot action completed is not necessarily serving: the
//! containers inside it may still be pulling images. The checker probes the
//! droplet's own public address over HTTPS until it answers `200`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::poll::{CancelToken, PollPolicy, PollStop};

/// Result of a single probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    /// The endpoint answered `200`.
    Healthy,
    /// The endpoint answered with another status code.
    Status(u16),
    /// No HTTP response: refused connection, timeout, TLS failure.
    Unreachable(String),
}

impl ProbeOutcome {
    /// Returns `true` for [`ProbeOutcome::Healthy`].
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Unreachable(reason) => write!(f, "unreachable: {reason}"),
        }
    }
}

/// Future returned by [`HealthProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>>;

/// One-shot reachability check of a URL.
pub trait HealthProbe {
    /// Issues a single request to `url`.
    fn probe<'a>(&'a self, url: &'a str) -> ProbeFuture<'a>;
}

/// HTTPS probe that accepts any certificate.
///
/// The droplet is addressed by raw IP before the floating IP points at it,
/// so its certificate cannot match. The bypass applies to this client only.
#[derive(Clone, Debug)]
pub struct HttpsProbe {
    client: reqwest::Client,
}

impl HttpsProbe {
    /// Builds a probe whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::Client`] when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| HealthError::Client(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpsProbe {
    fn probe<'a>(&'a self, url: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            match self.client.get(url).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    ProbeOutcome::Healthy
                }
                Ok(response) => ProbeOutcome::Status(response.status().as_u16()),
                Err(err) => ProbeOutcome::Unreachable(err.to_string()),
            }
        })
    }
}

/// Summary of a successful health wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HealthReport {
    /// URL that turned healthy.
    pub url: String,
    /// Probes issued, including the successful one.
    pub attempts: u32,
    /// Time from the first probe to the successful one.
    pub elapsed: Duration,
}

/// Errors raised by [`HealthChecker::poll_until_healthy`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HealthError {
    /// The HTTP client could not be constructed.
    #[error("failed to build health probe client: {0}")]
    Client(String),
    /// The policy bound was reached without a healthy answer.
    #[error("{url} not healthy after {attempts} probes (last: {last})")]
    Exhausted {
        /// URL being probed.
        url: String,
        /// Probes issued.
        attempts: u32,
        /// Outcome of the final probe.
        last: ProbeOutcome,
    },
    /// The run was cancelled while waiting.
    #[error("cancelled while waiting for {url} to become healthy")]
    Cancelled {
        /// URL being probed.
        url: String,
    },
}

/// Repeats a [`HealthProbe`] at a fixed interval until it succeeds.
#[derive(Clone, Debug)]
pub struct HealthChecker<P> {
    probe: P,
}

impl<P: HealthProbe> HealthChecker<P> {
    /// Wraps a probe.
    #[must_use]
    pub const fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Borrows the wrapped probe.
    #[must_use]
    pub const fn probe(&self) -> &P {
        &self.probe
    }

    /// Probes `url` until it answers `200`.
    ///
    /// N unhealthy probes followed by a healthy one cost N+1 probes and N
    /// sleeps of `policy.interval`.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::Exhausted`] when the policy bound is reached
    /// and [`HealthError::Cancelled`] when `cancel` fires.
    pub async fn poll_until_healthy(
        &self,
        url: &str,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<HealthReport, HealthError> {
        let mut poller = policy.start();
        loop {
            let outcome = self.probe.probe(url).await;
            if outcome.is_healthy() {
                let report = HealthReport {
                    url: url.to_owned(),
                    attempts: poller.attempts(),
                    elapsed: poller.elapsed(),
                };
                info!(url, attempts = report.attempts, "application healthy");
                return Ok(report);
            }
            debug!(url, attempt = poller.attempts(), %outcome, "application not healthy yet");

            match poller.next_attempt(cancel).await {
                Ok(()) => {}
                Err(PollStop::Exhausted { attempts, .. }) => {
                    return Err(HealthError::Exhausted {
                        url: url.to_owned(),
                        attempts,
                        last: outcome,
                    });
                }
                Err(PollStop::Cancelled) => {
                    return Err(HealthError::Cancelled {
                        url: url.to_owned(),
                    });
                }
            }
        }
    }
}

/// Builds the probe URL for an address and path.
#[must_use]
pub fn health_url(host: impl fmt::Display, path: &str) -> String {
    format!("https://{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProbe;
    use rstest::rstest;

    #[tokio::test(start_paused = true)]
    async fn n_failures_then_success_costs_n_plus_one_probes() {
        let probe = FakeProbe::new([
            ProbeOutcome::Unreachable("connection refused".to_owned()),
            ProbeOutcome::Status(502),
            ProbeOutcome::Status(503),
            ProbeOutcome::Healthy,
        ]);
        let checker = HealthChecker::new(probe);
        let policy = PollPolicy::unbounded(Duration::from_secs(5));

        let report = checker
            .poll_until_healthy("https://203.0.113.10/", &policy, &CancelToken::new())
            .await
            .unwrap_or_else(|err| panic!("health: {err}"));

        assert_eq!(report.attempts, 4);
        assert_eq!(report.elapsed, Duration::from_secs(15));
        assert_eq!(checker.probe().probe_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_first_probe_never_sleeps() {
        let checker = HealthChecker::new(FakeProbe::new([ProbeOutcome::Healthy]));
        let policy = PollPolicy::unbounded(Duration::from_secs(5));
        let report = checker
            .poll_until_healthy("https://203.0.113.10/", &policy, &CancelToken::new())
            .await
            .unwrap_or_else(|err| panic!("health: {err}"));
        assert_eq!(report.attempts, 1);
        assert_eq!(report.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_reports_last_outcome() {
        let checker = HealthChecker::new(FakeProbe::repeating(ProbeOutcome::Status(502)));
        let policy = PollPolicy::unbounded(Duration::from_secs(1)).with_max_attempts(3);
        let err = checker
            .poll_until_healthy("https://203.0.113.10/", &policy, &CancelToken::new())
            .await
            .expect_err("never healthy");
        assert_eq!(
            err,
            HealthError::Exhausted {
                url: "https://203.0.113.10/".to_owned(),
                attempts: 3,
                last: ProbeOutcome::Status(502),
            }
        );
        assert_eq!(checker.probe().probe_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let checker = HealthChecker::new(FakeProbe::repeating(ProbeOutcome::Status(503)));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = checker
            .poll_until_healthy(
                "https://203.0.113.10/",
                &PollPolicy::unbounded(Duration::from_secs(5)),
                &cancel,
            )
            .await
            .expect_err("cancelled");
        assert!(matches!(err, HealthError::Cancelled { .. }));
    }

    #[rstest]
    #[case("203.0.113.10", "/", "https://203.0.113.10/")]
    #[case("203.0.113.10", "/healthz", "https://203.0.113.10/healthz")]
    fn builds_probe_urls(#[case] host: &str, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(health_url(host, path), expected);
    }
}
