//! Exponential-backoff reconnection state.
//!
//! One attempt record lives across consecutive unintentional disconnects, so
//! the retry counter keeps climbing until a reopen succeeds or the retry
//! budget is spent. A fresh record is cloned from [`ReconnectConfig`] only
//! when no record is active.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng as _;

use crate::config::ReconnectConfig;

/// Snapshot of the reconnection state, carried by the `reconnecting` and
/// `reconnect` events for UI feedback.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    /// Attempt number, starting at 1 for the first retry
    pub attempt: u32,
    /// Configured delay floor
    pub min_delay: Duration,
    /// Configured delay ceiling
    pub max_delay: Duration,
    /// Configured exponential factor
    pub factor: f64,
    /// Configured retry budget (`None` = unlimited)
    pub max_retries: Option<u32>,
    /// Delay computed for this attempt
    pub delay: Duration,
}

/// Outcome of asking the controller for the next attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    /// An attempt was admitted; wait `state.delay`, then retry.
    Scheduled(BackoffState),
    /// A backoff is already counting down; nothing to do.
    Pending,
    /// The retry budget is spent; the record has been discarded.
    Exhausted,
}

#[derive(Debug)]
struct AttemptRecord {
    attempt: u32,
    in_progress: bool,
    delay: Duration,
}

#[derive(Debug)]
pub(crate) struct Reconnection {
    policy: ReconnectConfig,
    current: Mutex<Option<AttemptRecord>>,
}

impl Reconnection {
    pub(crate) fn new(policy: ReconnectConfig) -> Self {
        Self {
            policy,
            current: Mutex::new(None),
        }
    }

    // We can recover from a poisoned lock because the record is only mutated
    // under the guard in single steps.
    fn current(&self) -> MutexGuard<'_, Option<AttemptRecord>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the next reconnection attempt, if any.
    pub(crate) fn next(&self) -> Decision {
        let mut current = self.current();
        let record = current.get_or_insert_with(|| AttemptRecord {
            attempt: 0,
            in_progress: false,
            delay: Duration::ZERO,
        });

        if record.in_progress {
            return Decision::Pending;
        }

        record.attempt += 1;
        if self
            .policy
            .max_retries
            .is_some_and(|budget| record.attempt > budget)
        {
            *current = None;
            return Decision::Exhausted;
        }

        record.in_progress = true;
        record.delay = compute_delay(&self.policy, record.attempt);
        Decision::Scheduled(self.snapshot(record))
    }

    /// Mark the backoff delay as elapsed and return the attempt state for
    /// the `reconnect` event. Returns `None` when the record was discarded
    /// while the delay was counting down.
    pub(crate) fn finish_wait(&self) -> Option<BackoffState> {
        let mut current = self.current();
        let record = current.as_mut()?;
        record.in_progress = false;
        Some(self.snapshot(record))
    }

    /// Discard the attempt record (successful reopen or explicit close).
    pub(crate) fn reset(&self) {
        *self.current() = None;
    }

    /// Whether a reconnection attempt is currently active.
    pub(crate) fn active(&self) -> bool {
        self.current().is_some()
    }

    fn snapshot(&self, record: &AttemptRecord) -> BackoffState {
        BackoffState {
            attempt: record.attempt,
            min_delay: self.policy.min_delay,
            max_delay: self.policy.max_delay,
            factor: self.policy.factor,
            max_retries: self.policy.max_retries,
            delay: record.delay,
        }
    }
}

/// Delay for the given attempt: the configured minimum for the first try,
/// then `min((rand + 1) · min_delay · factor^attempt, max_delay)`. The
/// `rand + 1` term keeps the multiplier in `[1, 2)`, randomizing without
/// ever dipping below the deterministic exponential floor.
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "jittered delay computation is inherently floating point; values are clamped to the configured ceiling before conversion"
)]
fn compute_delay(policy: &ReconnectConfig, attempt: u32) -> Duration {
    if attempt <= 1 {
        return policy.min_delay;
    }

    let jitter = rand::rng().random::<f64>() + 1.0;
    let exponential = policy.factor.powi(attempt.min(i32::MAX as u32) as i32);
    let min_millis = policy.min_delay.as_millis() as f64;
    let max_millis = policy.max_delay.as_millis() as f64;

    let millis = (jitter * min_millis * exponential).round().min(max_millis);
    Duration::from_millis(millis as u64)
}
