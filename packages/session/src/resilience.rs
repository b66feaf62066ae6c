//! Retry and backoff around connect attempts
//!
//! A [`ResiliencePolicy`] wraps every connect attempt, pooled or not. The
//! connector passes straight through when no policy is configured.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;

use crate::error::Result;
use crate::transport::Session;

/// What is being attempted, for policies that log or vary by endpoint
#[derive(Debug, Clone)]
pub struct ResilienceContext {
    /// Operation name
    pub operation: &'static str,
    /// Endpoint url
    pub endpoint: String,
}

/// One restartable connect attempt
pub type ConnectOperation<'a> =
    Box<dyn FnMut() -> BoxFuture<'static, Result<Arc<dyn Session>>> + Send + 'a>;

/// Decides how often and when a failed connect is repeated
#[async_trait]
pub trait ResiliencePolicy: Send + Sync {
    /// Run `operation` until it succeeds or the policy gives up
    async fn execute(
        &self,
        context: &ResilienceContext,
        operation: ConnectOperation<'_>,
    ) -> Result<Arc<dyn Session>>;
}

/// Exponential backoff retry of retryable errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub backoff_multiplier: f64,
    /// Add up to a quarter of the delay at random
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff_multiplier.max(1.0)).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let range = delay.as_millis() as u64 / 4;
        delay + Duration::from_millis(rand::rng().random_range(0..=range))
    }
}

#[async_trait]
impl ResiliencePolicy for RetryPolicy {
    async fn execute(
        &self,
        context: &ResilienceContext,
        mut operation: ConnectOperation<'_>,
    ) -> Result<Arc<dyn Session>> {
        let mut attempts = 0;
        let mut delay = self.base_delay;

        loop {
            match operation().await {
                Ok(session) => {
                    if attempts > 0 {
                        tracing::debug!(
                            operation = context.operation,
                            endpoint = %context.endpoint,
                            attempts = attempts + 1,
                            "Connect succeeded after retry"
                        );
                    }
                    return Ok(session);
                }
                Err(error) => {
                    attempts += 1;

                    if !error.is_retryable() {
                        tracing::warn!(
                            endpoint = %context.endpoint,
                            error = %error,
                            "Non-retryable connect error"
                        );
                        return Err(error);
                    }
                    if attempts >= self.max_attempts {
                        tracing::error!(
                            endpoint = %context.endpoint,
                            max_attempts = self.max_attempts,
                            error = %error,
                            "Connect retries exhausted"
                        );
                        return Err(error);
                    }

                    let actual = self.jittered(delay);
                    tracing::debug!(
                        endpoint = %context.endpoint,
                        attempt = attempts + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = actual.as_millis() as u64,
                        error = %error,
                        "Retrying connect"
                    );
                    tokio::time::sleep(actual).await;
                    delay = self.next_delay(delay);
                }
            }
        }
    }
}

/// Applies the configured policy to connect operations
#[derive(Clone, Default)]
pub struct ResilientConnector {
    policy: Option<Arc<dyn ResiliencePolicy>>,
}

impl fmt::Debug for ResilientConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientConnector")
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

impl ResilientConnector {
    /// Connector applying `policy`, or passing through when `None`
    pub fn new(policy: Option<Arc<dyn ResiliencePolicy>>) -> Self {
        Self { policy }
    }

    /// Connector that never retries
    pub fn passthrough() -> Self {
        Self { policy: None }
    }

    /// Run one connect through the policy
    pub async fn execute(
        &self,
        context: ResilienceContext,
        mut operation: ConnectOperation<'_>,
    ) -> Result<Arc<dyn Session>> {
        match &self.policy {
            Some(policy) => policy.execute(&context, operation).await,
            None => operation().await,
        }
    }
}
