//! Bounded exponential backoff for the "ask until it answers" loops.
//!
//! Publishers registering, consumers bootstrapping and consumers asking for
//! a song list all poll a broker that may not be ready yet. They share this
//! policy: wait `initial`, double after every failure, never wait longer
//! than `max`, and optionally give up after `max_attempts`.

use std::future::Future;
use std::time::Duration;

use encore_core::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("{what}: gave up after {attempts} attempts")]
    Exhausted { what: &'static str, attempts: u32 },
}

impl RetryPolicy {
    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Run `op` until it yields `Some`, sleeping between attempts.
    ///
    /// `what` names the loop in logs and in the exhaustion error. Dropping
    /// the returned future cancels the loop.
    pub async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut attempt = 1;
        loop {
            if let Some(value) = op(attempt).await {
                if attempt > 1 {
                    tracing::debug!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            if self.max_attempts.is_some_and(|max| attempt >= max) {
                tracing::warn!(what, attempts = attempt, "retries exhausted");
                return Err(RetryError::Exhausted {
                    what,
                    attempts: attempt,
                });
            }
            let delay = self.delay(attempt);
            tracing::debug!(what, attempt, ?delay, "not ready, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
