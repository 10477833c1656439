//! Retry policy: error classification, exponential backoff, and a
//! per-error-kind sliding-window cap shared by all tasks.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// Classified failure kind reported by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A shared resource (memory, disk, lock, quota) was temporarily unavailable.
    TransientResource,
    /// Network or remote service failure.
    Network,
    /// The executor did not answer within its time budget.
    Timeout,
    /// Missing permission. Retrying will not help.
    Permission,
    /// Bad input or a bug in the task. Retrying will not help.
    Logic,
    /// Anything unclassified.
    Unknown,
}

impl ErrorKind {
    /// Whether this kind is worth retrying at all.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransientResource | Self::Network | Self::Timeout | Self::Unknown
        )
    }

    /// Stable name used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientResource => "transient_resource",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Permission => "permission",
            Self::Logic => "logic",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a free-text error message by keyword.
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["timed out", "timeout", "deadline"]) {
            Self::Timeout
        } else if has(&["permission", "denied", "unauthorized", "forbidden"]) {
            Self::Permission
        } else if has(&[
            "network",
            "connection",
            "unreachable",
            "dns",
            "socket",
            "http",
        ]) {
            Self::Network
        } else if has(&[
            "memory",
            "resource",
            "busy",
            "locked",
            "quota",
            "unavailable",
            "disk full",
            "too many",
        ]) {
            Self::TransientResource
        } else if has(&["invalid", "parse", "missing", "not found", "unsupported"]) {
            Self::Logic
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Re-arm after the given delay.
    RetryAfter(Duration),
    /// Stop retrying; the task becomes terminal.
    GiveUp(String),
}

/// Sliding-window retry counter per error kind, shared across all tasks.
#[derive(Debug, Clone)]
pub struct KindRateLimiter {
    window: Duration,
    limit: u32,
    grants: HashMap<ErrorKind, VecDeque<DateTime<Utc>>>,
}

impl KindRateLimiter {
    /// Allow at most `limit` retries per kind within `window`.
    #[must_use]
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            window,
            limit,
            grants: HashMap::new(),
        }
    }

    /// Try to record one retry of `kind` at `now` under `cap`.
    ///
    /// Returns `false` without recording when the window is full.
    pub fn try_acquire(&mut self, kind: ErrorKind, cap: u32, now: DateTime<Utc>) -> bool {
        let window = self.grants.entry(kind).or_default();
        let window_start = now - chrono::Duration::from_std(self.window).unwrap_or_default();

        while let Some(&first) = window.front() {
            if first <= window_start {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= cap as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Retries of `kind` granted within the window ending at `now`.
    #[must_use]
    pub fn recent(&self, kind: ErrorKind, now: DateTime<Utc>) -> usize {
        let window_start = now - chrono::Duration::from_std(self.window).unwrap_or_default();
        self.grants
            .get(&kind)
            .map_or(0, |w| w.iter().filter(|t| **t > window_start).count())
    }

    /// Configured per-kind limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Decides retry vs. give up for failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
    deprioritized_divisor: u32,
    limiter: KindRateLimiter,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            deprioritized_divisor: config.deprioritized_cap_divisor.max(1),
            limiter: KindRateLimiter::new(
                Duration::from_secs(config.kind_window_secs),
                config.kind_limit,
            ),
        }
    }

    /// Backoff before jitter: `min(cap, base * 2^retry_count)`.
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let jitter = delay.as_secs_f64() * (rand::random::<f64>() * self.jitter_ratio);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `retry_count` is the number of retries already consumed. The per-kind
    /// window cap is divided for deprioritized task types.
    pub fn evaluate(
        &mut self,
        kind: ErrorKind,
        retry_count: u32,
        max_retries: u32,
        deprioritized: bool,
        now: DateTime<Utc>,
    ) -> RetryVerdict {
        if !kind.is_retryable() {
            return RetryVerdict::GiveUp(format!("{kind} errors are not retryable"));
        }
        if retry_count >= max_retries {
            return RetryVerdict::GiveUp(format!("retry budget exhausted ({max_retries})"));
        }

        let cap = if deprioritized {
            (self.limiter.limit() / self.deprioritized_divisor)
                .max(1)
                .min(self.limiter.limit())
        } else {
            self.limiter.limit()
        };
        if !self.limiter.try_acquire(kind, cap, now) {
            return RetryVerdict::GiveUp(format!(
                "{kind} retry window full ({cap} per {}s)",
                self.limiter.window.as_secs()
            ));
        }

        RetryVerdict::RetryAfter(self.jittered(self.backoff(retry_count)))
    }

    /// Retries of `kind` granted recently, for diagnostics.
    #[must_use]
    pub fn recent_retries(&self, kind: ErrorKind, now: DateTime<Utc>) -> usize {
        self.limiter.recent(kind, now)
    }
}
