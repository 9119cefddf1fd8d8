//! Client used by backend services to join and leave the registry.
//!
//! Admission is retried: an unreachable registry, a 5xx, or a rejected
//! admission probe (a service that registers before its own health endpoint
//! is ready) each get a few more chances. Heartbeat eviction stays one-strike.

use crate::access::REGISTRY_KEY_HEADER;
use crate::registry::HEALTH_CHECK_FAILED;
use crate::types::ServiceRegistration;
use common::{Error, ErrorBody, Result};
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded exponential backoff with random jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `min(base * 2^attempt + jitter, max)`, jitter drawn from `0..=base*2^attempt/2`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let backoff = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
        let jitter = random_jitter(backoff / 2);
        Duration::from_millis(backoff.saturating_add(jitter).min(max_ms))
    }
}

fn random_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_jitter)
}

/// Errors worth another attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamUnavailable(_) => true,
            Error::UpstreamError { status, .. } => *status >= 500,
            Error::Validation(message) => message.starts_with(HEALTH_CHECK_FAILED),
            _ => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Registry answer to an accepted registration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    pub name: String,
    pub port: u16,
    pub version: String,
    pub registered_at: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: T,
}

/// HTTP client for the registry surface.
pub struct RegistrationClient {
    registry_url: String,
    registry_key: Option<String>,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl RegistrationClient {
    pub fn new(registry_url: impl Into<String>, registry_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            registry_key: registry_key.filter(|k| !k.is_empty()),
            retry: RetryPolicy::default(),
            http,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Register, retrying transient failures.
    pub async fn register(&self, registration: &ServiceRegistration) -> Result<RegistrationReceipt> {
        let key = self.key()?;
        let url = format!("{}/registry/register", self.registry_url);

        let http = &self.http;
        let url = url.as_str();

        let receipt: Envelope<RegistrationReceipt> = with_retry(&self.retry, move || async move {
            let response = http
                .post(url)
                .header(REGISTRY_KEY_HEADER, key)
                .json(registration)
                .send()
                .await
                .map_err(transport_error)?;
            read_envelope(response).await
        })
        .await
        .inspect_err(|e| warn!(service = %registration.name, error = %e, "Registration failed"))?;

        info!(
            service = %receipt.data.name,
            version = %receipt.data.version,
            "Registered with registry"
        );
        Ok(receipt.data)
    }

    /// Deregister once. `Ok(false)` when the registry did not know the name.
    pub async fn deregister(&self, name: &str) -> Result<bool> {
        let key = self.key()?;
        let url = format!("{}/registry/services/{}", self.registry_url, name);

        let response = self
            .http
            .delete(&url)
            .header(REGISTRY_KEY_HEADER, key)
            .send()
            .await
            .map_err(transport_error)?;

        let answer: Envelope<serde_json::Value> = read_envelope(response).await?;
        if let Some(message) = &answer.message {
            debug!(service = name, message = %message, "Deregistration answered");
        }
        Ok(answer.success)
    }

    fn key(&self) -> Result<&str> {
        self.registry_key
            .as_deref()
            .ok_or_else(|| Error::misconfiguration("Registry key is not configured"))
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::upstream_unavailable(format!("Registry unreachable: {}", e))
    } else {
        Error::upstream(502, format!("Registry request failed: {}", e))
    }
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Envelope<T>> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;

    if status.is_success() {
        return serde_json::from_slice(&body).map_err(Error::from);
    }

    let message = serde_json::from_slice::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| format!("Registry answered {}", status));

    Err(error_for_status(status.as_u16(), message))
}

/// Map a registry error status back onto the taxonomy.
fn error_for_status(status: u16, message: String) -> Error {
    match status {
        400 => Error::Validation(message),
        401 => Error::Unauthorized(message),
        403 => Error::Forbidden(message),
        404 => Error::NotRegistered(message),
        503 => Error::UpstreamUnavailable(message),
        _ => Error::UpstreamError { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };

        let first = policy.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));

        let third = policy.delay_for_attempt(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));

        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::upstream_unavailable("down").is_retryable());
        assert!(Error::upstream(502, "bad gateway").is_retryable());
        assert!(!Error::upstream(404, "nope").is_retryable());
        assert!(!Error::validation("Invalid registration: port").is_retryable());
        assert!(Error::validation("Service health check failed: HTTP 503").is_retryable());
        assert!(!Error::unauthorized("no").is_retryable());
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32> = with_retry(&fast_policy(5), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Error::upstream_unavailable("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(tokio_test::assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&fast_policy(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("Invalid registration: name"))
            }
        })
        .await;

        assert!(matches!(tokio_test::assert_err!(result), Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&fast_policy(4), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::upstream(500, "boom"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_missing_key_is_misconfiguration() {
        let client = RegistrationClient::new("http://127.0.0.1:1", Some(String::new())).unwrap();
        let err = client.deregister("posts").await.unwrap_err();
        assert!(matches!(err, Error::Misconfiguration(_)));
    }

    #[test]
    fn test_error_for_status() {
        assert!(matches!(error_for_status(400, "x".into()), Error::Validation(_)));
        assert!(matches!(error_for_status(403, "x".into()), Error::Forbidden(_)));
        assert!(matches!(
            error_for_status(500, "x".into()),
            Error::UpstreamError { status: 500, .. }
        ));
        assert_eq!(error_for_status(503, "x".into()).status_code(), 503);
    }
}
