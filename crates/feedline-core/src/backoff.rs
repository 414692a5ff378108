//! Retry pacing after failed transport cycles.
//!
//! - [`BackoffPolicy`]: the pure `next(prev) = min(prev * factor, max)` step
//! - [`Backoff`]: per-transport tracker that hands out the current delay and
//!   advances on failure, resetting on success
//!
//! The factor is held in thousandths so the sequence is exact integer math
//! (`1000, 1700, 2890, 4913, …`). There is no jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first retry delay in milliseconds.
pub const DEFAULT_INITIAL_MS: u64 = 1000;
/// Default growth factor between consecutive failures.
pub const DEFAULT_FACTOR: f64 = 1.7;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_MS: u64 = 30_000;

/// Exponential backoff parameters.
///
/// Serialized as `{ initialMs, factor, maxMs }`. Deserializing goes through
/// [`BackoffPolicy::new`], so the same clamps apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PolicyRepr", into = "PolicyRepr")]
pub struct BackoffPolicy {
    initial_ms: u64,
    factor_permille: u64,
    max_ms: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRepr {
    initial_ms: u64,
    factor: f64,
    max_ms: u64,
}

impl From<PolicyRepr> for BackoffPolicy {
    fn from(repr: PolicyRepr) -> Self {
        Self::new(repr.initial_ms, repr.factor, repr.max_ms)
    }
}

impl From<BackoffPolicy> for PolicyRepr {
    #[allow(clippy::cast_precision_loss)]
    fn from(policy: BackoffPolicy) -> Self {
        Self {
            initial_ms: policy.initial_ms,
            factor: policy.factor_permille as f64 / 1000.0,
            max_ms: policy.max_ms,
        }
    }
}

impl BackoffPolicy {
    /// Build a policy. `initial_ms` of zero is raised to 1, `factor` below
    /// 1.0 is clamped to 1.0 and `max_ms` below `initial_ms` is raised to
    /// `initial_ms`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(initial_ms: u64, factor: f64, max_ms: u64) -> Self {
        let initial_ms = initial_ms.max(1);
        let factor_permille = if factor.is_finite() {
            (factor.max(1.0) * 1000.0).round() as u64
        } else {
            1000
        };
        Self {
            initial_ms,
            factor_permille,
            max_ms: max_ms.max(initial_ms),
        }
    }

    /// First delay, and the value a tracker returns to after success.
    pub fn initial_ms(&self) -> u64 {
        self.initial_ms
    }

    /// Upper bound on any delay.
    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Delay following `prev_ms`: `min(prev * factor, max)`.
    pub fn next(&self, prev_ms: u64) -> u64 {
        let grown = prev_ms.saturating_mul(self.factor_permille) / 1000;
        grown.min(self.max_ms)
    }

    /// Delay waited after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u32) -> u64 {
        let mut delay = self.initial_ms;
        for _ in 1..failures {
            let next = self.next(delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_MS, DEFAULT_FACTOR, DEFAULT_MAX_MS)
    }
}

/// Running backoff state for one transport.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current_ms: u64,
}

impl Backoff {
    /// Start at the policy's initial delay.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current_ms: policy.initial_ms,
        }
    }

    /// Delay the next failure will wait, without advancing.
    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    /// Record a failure: returns the delay to wait now and advances.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = self.policy.next(delay);
        Duration::from_millis(delay)
    }

    /// Record a success: the next failure waits the initial delay again.
    pub fn reset(&mut self) {
        self.current_ms = self.policy.initial_ms;
    }
}
