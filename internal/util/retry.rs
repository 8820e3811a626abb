use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    pub max_delay: Duration,
    pub backoff: u32,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
            max_delay: delay,
            backoff: 1,
            jitter: Duration::ZERO,
        }
    }

    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn with_backoff(mut self, backoff: u32, max_delay: Duration) -> Self {
        self.backoff = backoff.max(1);
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        let cap = self.max_delay.max(self.delay);
        let base = self.delay.saturating_mul(factor).min(cap);
        base + self.jitter_sample()
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }

    pub async fn retry<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry_if(label, op, |_| true).await
    }

    pub async fn retry_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !retryable(&err) || !self.pause_after(label, attempt, &err).await {
                return Err(err);
            }
        }
    }

    /// Logs a failed `attempt` and sleeps before the next one. Returns false,
    /// without sleeping, once the attempt bound is reached.
    pub async fn pause_after<E: Display>(&self, label: &str, attempt: u32, err: &E) -> bool {
        if self.exhausted(attempt) {
            return false;
        }
        let delay = self.delay_for(attempt);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "{label}; retrying"
        );
        sleep(delay).await;
        true
    }
}
