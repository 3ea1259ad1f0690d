use crate::net::RpcCode;
use crate::status::{ClientCode, Status, StatusGroup};
use crate::util::ClientError;
use crate::wire::STATUS_ERROR;
use rand::{thread_rng, Rng};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub enum RetryStrategy {
    Linear,
    Exponential,
}

/// Status group and code pairs that make an attempt worth repeating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryableCodes {
    codes: HashSet<(StatusGroup, i32)>,
}

impl RetryableCodes {
    pub fn none() -> Self {
        Self {
            codes: HashSet::new(),
        }
    }

    pub fn with(mut self, group: StatusGroup, code: i32) -> Self {
        self.codes.insert((group, code));
        self
    }

    pub fn contains(&self, status: &Status) -> bool {
        self.codes.contains(&(status.group(), status.code()))
    }

    /// An aggregated error is retryable when any of its statuses is.
    pub fn is_retryable(&self, err: &ClientError) -> bool {
        err.any_status(&|status| self.contains(status))
    }
}

impl Default for RetryableCodes {
    fn default() -> Self {
        Self::none()
            .with(
                StatusGroup::EndorserClient,
                ClientCode::ConnectionFailed.as_i32(),
            )
            .with(
                StatusGroup::EndorserClient,
                ClientCode::EndorsementMismatch.as_i32(),
            )
            .with(
                StatusGroup::EndorserClient,
                ClientCode::PrematureChaincodeExecution.as_i32(),
            )
            .with(
                StatusGroup::EndorserClient,
                ClientCode::ChaincodeAlreadyLaunching.as_i32(),
            )
            .with(
                StatusGroup::EndorserClient,
                ClientCode::ChaincodeNameNotFound.as_i32(),
            )
            .with(StatusGroup::Transport, RpcCode::Unavailable.as_i32())
            .with(StatusGroup::Transport, RpcCode::DeadlineExceeded.as_i32())
            .with(StatusGroup::EndorserServer, STATUS_ERROR)
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
    skip_first_delay: bool,
    time_budget: Option<Duration>,
    retryable: RetryableCodes,
}

impl RetryPolicy {
    pub fn linear(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Linear, max_attempts, base_delay)
    }

    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Exponential, max_attempts, base_delay)
    }

    fn new(strategy: RetryStrategy, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
            skip_first_delay: false,
            time_budget: None,
            retryable: RetryableCodes::default(),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn with_skip_first_delay(mut self, skip: bool) -> Self {
        self.skip_first_delay = skip;
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget.filter(|duration| !duration.is_zero());
        self
    }

    pub fn with_retryable_codes(mut self, codes: RetryableCodes) -> Self {
        self.retryable = codes;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn should_retry(&self, err: &ClientError) -> bool {
        self.retryable.is_retryable(err)
    }

    pub fn handle(&self) -> RetryHandle {
        self.handle_from(Instant::now())
    }

    pub fn handle_from(&self, start: Instant) -> RetryHandle {
        let deadline = self
            .time_budget
            .and_then(|budget| start.checked_add(budget));
        RetryHandle {
            policy: self.clone(),
            attempts: 0,
            deadline,
        }
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let raw = match self.strategy {
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt as u32),
            RetryStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                let factor = 1u128 << shift;
                let scaled = self.base_delay.as_millis().saturating_mul(factor);
                Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64)
            }
        };
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let jitter = self.jitter_fraction.min(1.0);
        let factor = thread_rng().gen_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
        let jittered = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(jittered.min(u64::MAX as f64) as u64)
    }
}

impl Default for RetryPolicy {
    /// Five retries after the first attempt, doubling from 500 ms up to 60 s.
    fn default() -> Self {
        Self::exponential(6, Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.1)
    }
}

/// Tracks attempts made under one [`RetryPolicy`].
pub struct RetryHandle {
    policy: RetryPolicy,
    attempts: usize,
    deadline: Option<Instant>,
}

impl RetryHandle {
    /// Returns the delay before the next attempt, or `None` once the attempt
    /// count or the time budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts + 1 >= self.policy.max_attempts {
            return None;
        }
        let next = self.attempts + 1;
        let mut delay = self.policy.delay_for_attempt(next);
        if self.policy.skip_first_delay && next == 1 {
            delay = Duration::ZERO;
        }
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if !delay.is_zero() {
                match now.checked_add(delay) {
                    Some(next_instant) if next_instant <= deadline => {}
                    _ => return None,
                }
            }
        }
        self.attempts = next;
        Some(delay)
    }

    /// Decides whether `err` warrants another attempt and, if so, how long to
    /// wait first.
    pub fn next_retry(&mut self, err: &ClientError) -> Option<Duration> {
        if !self.policy.should_retry(err) {
            return None;
        }
        self.next_delay()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
