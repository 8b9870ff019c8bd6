use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, warn};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;

use crate::config::RestConfig;
use crate::error::{RequestError, TransientRequestError};
use crate::metrics::{METRICS, RuntimeMetrics};

use super::rate_limit::{RateLimiter, Unlimited};
use super::transport::{HttpTransport, ReqwestTransport};
use super::RequestDescriptor;

/// Which HTTP error statuses are worth another attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// 5xx, 408 and 429 are retried; any other error status is final.
    #[default]
    Transient,

    /// Every error status is retried like a network failure.
    All,
}

impl StatusPolicy {
    pub fn is_retryable(self, status: StatusCode) -> bool {
        match self {
            Self::All => true,
            Self::Transient => {
                status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Bounded exponential backoff: `base_delay * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub statuses: StatusPolicy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            statuses: StatusPolicy::default(),
        }
    }

    pub fn with_statuses(mut self, statuses: StatusPolicy) -> Self {
        self.statuses = statuses;
        self
    }

    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&RestConfig> for RetryPolicy {
    fn from(cfg: &RestConfig) -> Self {
        Self::new(cfg.max_retries, cfg.retry_delay()).with_statuses(cfg.status_policy)
    }
}

/// Issues logical HTTP requests with rate limiting and bounded retry.
///
/// Owns its transport. After `close()` no new attempt is started, but a
/// request already on the wire is allowed to finish.
pub struct RetryingRequestExecutor {
    transport: Box<dyn HttpTransport>,
    limiter: Arc<dyn RateLimiter>,
    policy: RetryPolicy,
    closed: AtomicBool,
}

impl RetryingRequestExecutor {
    /// Builds an executor backed by reqwest from the REST configuration.
    pub fn new(config: &RestConfig) -> Result<Self, RequestError> {
        if config.timeout_secs == 0 {
            return Err(RequestError::Config("request timeout must be positive".into()));
        }
        let transport = ReqwestTransport::new(config.timeout(), config.proxy.as_deref())?;
        Ok(Self::with_transport(Box::new(transport), RetryPolicy::from(config)))
    }

    pub fn with_transport(transport: Box<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter: Arc::new(Unlimited),
            policy,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends `request` until it succeeds, fails fatally, or the retry
    /// budget is spent. Returns the parsed JSON body.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Value, RequestError> {
        Url::parse(&request.url)
            .map_err(|e| RequestError::Config(format!("invalid url {}: {e}", request.url)))?;

        let mut attempt: u32 = 0;

        loop {
            if self.is_closed() {
                return Err(RequestError::Closed);
            }

            let wait = self.limiter.wait_time().await;
            if !wait.is_zero() {
                debug!("rate limited, waiting {:?} before {} {}", wait, request.method, request.url);
                sleep(wait).await;
            }

            RuntimeMetrics::incr(&METRICS.rest_attempts);

            let failure = match self.transport.send(request).await {
                Ok(response) if response.status.is_success() => {
                    return serde_json::from_str(&response.body).map_err(|source| {
                        RequestError::Decode {
                            url: request.url.clone(),
                            source,
                        }
                    });
                }
                Ok(response) => {
                    let status = response.status;
                    let failure = TransientRequestError::Status {
                        status,
                        body: response.body,
                    };
                    if !self.policy.statuses.is_retryable(status) {
                        RuntimeMetrics::incr(&METRICS.rest_failures);
                        error!("{} {} rejected: {}", request.method, request.url, failure);
                        return Err(RequestError::Rejected {
                            url: request.url.clone(),
                            source: failure,
                        });
                    }
                    failure
                }
                Err(failure) => failure,
            };

            if attempt >= self.policy.max_retries {
                RuntimeMetrics::incr(&METRICS.rest_failures);
                error!(
                    "{} {} failed after {} attempts: {}",
                    request.method,
                    request.url,
                    attempt + 1,
                    failure
                );
                return Err(RequestError::Exhausted {
                    url: request.url.clone(),
                    attempts: attempt + 1,
                    source: failure,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                "{} {} failed (attempt {}/{}): {}; retrying in {:?}",
                request.method,
                request.url,
                attempt + 1,
                self.policy.max_retries + 1,
                failure,
                delay
            );
            RuntimeMetrics::incr(&METRICS.rest_retries);
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Like [`execute`](Self::execute) but deserializes into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<T, RequestError> {
        let value = self.execute(request).await?;
        serde_json::from_value(value).map_err(|source| RequestError::Decode {
            url: request.url.clone(),
            source,
        })
    }

    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, RequestError> {
        let request = query
            .iter()
            .fold(RequestDescriptor::get(url), |request, (key, value)| {
                request.query(*key, value)
            });
        self.execute(&request).await
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.execute(&RequestDescriptor::post(url).json(body)).await
    }

    /// Stops further attempts and releases the transport. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.close().await;
        debug!("request executor closed");
    }
}
