//! Error Policy
//!
//! Classifies failed generation attempts, computes the rate-limit backoff
//! schedule and keeps the consecutive-failure count that drives the circuit
//! breaker. The policy holds no timers; it only decides. The prefetch engine
//! acts on its [`RetryDecision`]s.

use crate::error::{GenerationError, PipelineError, SourceError};
use std::time::Duration;

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Explicit rate-limit signal: retried locally with backoff.
    RateLimited,
    /// Any other transport failure: surfaced immediately.
    Transient,
    /// Malformed or incomplete document: surfaced immediately.
    ParseFailure,
    /// Superseded by a parameter change; not a failure at all.
    Stale,
}

impl FailureClass {
    pub fn counts_toward_breaker(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

impl From<&SourceError> for FailureClass {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::RateLimited(_) => Self::RateLimited,
            SourceError::Transport(_) => Self::Transient,
        }
    }
}

impl From<&GenerationError> for FailureClass {
    fn from(err: &GenerationError) -> Self {
        match err {
            GenerationError::Source(source) => source.into(),
            GenerationError::Parse(_) => Self::ParseFailure,
        }
    }
}

/// Exponential backoff for rate-limited requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Doubled once per attempt: retry `k` waits `base_delay * 2^k`.
    pub base_delay: Duration,
    /// No retry ever waits less than this.
    pub min_delay: Duration,
    /// Retries allowed per request before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            min_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based). Non-decreasing in `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).max(self.min_delay)
    }
}

/// Counts consecutive non-stale failures across all requests of a session.
///
/// There is no half-open state: once open, the breaker stays open until
/// [`CircuitBreaker::reset`] is called for a fresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    /// Records a failure and returns whether the breaker is now open.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.is_open()
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// What the engine should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule retry number `attempt` after `delay`.
    RetryAfter { attempt: u32, delay: Duration },
    /// Stop and report `PipelineError` to any waiting caller.
    GiveUp(PipelineError),
    /// Nothing to do (stale results).
    Ignore,
}

/// Retry classification plus the session-wide circuit breaker.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ErrorPolicy {
    pub fn new(retry: RetryPolicy, breaker_threshold: u32) -> Self {
        Self {
            retry,
            breaker: CircuitBreaker::new(breaker_threshold),
        }
    }

    /// Refuses new work once the breaker is open.
    pub fn admit(&self) -> Result<(), PipelineError> {
        if self.breaker.is_open() {
            Err(PipelineError::CircuitOpen)
        } else {
            Ok(())
        }
    }

    /// Decides how to react to a failure. `retries_so_far` is the number of
    /// retries already spent on the current request.
    pub fn on_failure(
        &mut self,
        class: FailureClass,
        retries_so_far: u32,
        detail: &str,
    ) -> RetryDecision {
        if !class.counts_toward_breaker() {
            return RetryDecision::Ignore;
        }
        if self.breaker.record_failure() {
            return RetryDecision::GiveUp(PipelineError::CircuitOpen);
        }
        match class {
            FailureClass::RateLimited => {
                let attempt = retries_so_far + 1;
                if attempt <= self.retry.max_attempts {
                    RetryDecision::RetryAfter {
                        attempt,
                        delay: self.retry.delay_for(attempt),
                    }
                } else {
                    RetryDecision::GiveUp(PipelineError::RetriesExhausted {
                        attempts: retries_so_far,
                    })
                }
            }
            FailureClass::Transient => RetryDecision::GiveUp(PipelineError::Transient(detail.into())),
            FailureClass::ParseFailure => {
                RetryDecision::GiveUp(PipelineError::ParseFailure(detail.into()))
            }
            FailureClass::Stale => RetryDecision::Ignore,
        }
    }

    pub fn on_success(&mut self) {
        self.breaker.record_success();
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn reset(&mut self) {
        self.breaker.reset();
    }
}
