//! Bounded connection retry layered outside any connector.

use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{Connector, SessionConfig, TransportEvents, TransportHandle};
use crate::TransportError;

/// How many times to try opening a session, and how long to wait between tries.
///
/// Only applies to `connect`; an established session is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    ///
    /// Default: 3
    pub max_attempts: u32,

    /// Wait before the second attempt; doubled for each one after.
    ///
    /// Default: 500ms
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
        }
    }
}

/// Wraps a connector and retries transient connection failures.
///
/// Rejections and protocol errors are returned immediately.
///
/// # Example
///
/// ```
/// use companion_voice::transport::{MockConnector, RetryPolicy, RetryingConnector};
///
/// let connector = RetryingConnector::new(MockConnector::new(), RetryPolicy::default());
/// ```
#[derive(Debug, Clone)]
pub struct RetryingConnector<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingConnector<C> {
    /// Wraps `inner` with the given policy.
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped connector.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: Connector> Connector for RetryingConnector<C> {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(TransportHandle, TransportEvents), TransportError> {
        let mut attempts = 0;
        let mut delay = self.policy.initial_delay;

        loop {
            match self.inner.connect(config.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts >= self.policy.max_attempts {
                        return Err(e);
                    }

                    tracing::warn!(attempt = attempts, error = %e, ?delay, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}
