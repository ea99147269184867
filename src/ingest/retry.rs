use std::fmt;
use std::time::Duration;

use crate::config::RetrySettings;

/// Error context marking a source that already spent its own retry budget.
///
/// Callers must not retry a read that failed with this attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceExhausted;

impl fmt::Display for SourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("frame source gave up")
    }
}

/// True when `err` carries `SourceExhausted`.
pub fn is_exhausted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SourceExhausted>().is_some()
}

/// Decision after a failed frame read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Wait this long, then read again.
    RetryAfter(Duration),
    /// Too many consecutive failures; end the session.
    GiveUp,
}

/// Bounded exponential backoff for transient frame-read failures.
///
/// The failure count resets on every successful read.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_consecutive_failures: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    consecutive_failures: u32,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_consecutive_failures: settings.max_consecutive_failures,
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
            consecutive_failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> ReadOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > self.max_consecutive_failures {
            return ReadOutcome::GiveUp;
        }
        let shift = (self.consecutive_failures - 1).min(16);
        let backoff = self
            .initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff);
        ReadOutcome::RetryAfter(backoff)
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(&RetrySettings {
            max_consecutive_failures: max,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        })
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut retry = policy(10);
        let delays: Vec<_> = (0..5)
            .map(|_| match retry.record_failure() {
                ReadOutcome::RetryAfter(d) => d.as_millis(),
                ReadOutcome::GiveUp => 0,
            })
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn gives_up_after_bound_and_resets_on_success() {
        let mut retry = policy(2);
        assert!(matches!(retry.record_failure(), ReadOutcome::RetryAfter(_)));
        assert!(matches!(retry.record_failure(), ReadOutcome::RetryAfter(_)));
        assert_eq!(retry.record_failure(), ReadOutcome::GiveUp);

        retry.record_success();
        assert_eq!(retry.consecutive_failures(), 0);
        assert!(matches!(retry.record_failure(), ReadOutcome::RetryAfter(_)));
    }

    #[test]
    fn exhausted_marker_survives_more_context() {
        let err = anyhow::anyhow!("read failed")
            .context(SourceExhausted)
            .context("capture thread");
        assert!(is_exhausted(&err));
        assert!(!is_exhausted(&anyhow::anyhow!("read failed")));
    }
}
