//! Per-link download state machine
//!
//! ```text
//! Pending -> Attempting(0) -> Succeeded
//!                          -> Retrying(1) -> Attempting(1) -> ...
//!                          -> FailedTerminal
//! ```
//!
//! `n` in `Attempting(n)` is the number of retries already consumed, so it
//! never exceeds `max_retries`. The machine performs no I/O; the download
//! manager drives it and sleeps for the delays it hands out.

use std::time::Duration;

/// State of one link's download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Attempting(u32),
    /// Waiting before the given attempt
    Retrying(u32),
    Succeeded,
    FailedTerminal,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

/// Retry budget and backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry `n + 1` after attempt `n` failed
    ///
    /// Linear backoff: `retry_delay * (n + 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt.saturating_add(1))
    }
}

/// What the driver should do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Sleep, then run the next attempt
    Retry { next_attempt: u32, delay: Duration },
    /// Retry budget exhausted
    Fail,
}

/// Drives a single link through its download states
#[derive(Debug, Clone)]
pub struct DownloadMachine {
    state: DownloadState,
    policy: RetryPolicy,
    /// Retries consumed by the current or last attempt
    attempt: u32,
    last_error: Option<String>,
}

impl DownloadMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: DownloadState::Pending,
            policy,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Retries consumed so far
    pub fn retry_count(&self) -> u32 {
        self.attempt
    }

    /// Starts the next attempt
    ///
    /// # Returns
    ///
    /// The attempt number, or `None` if the machine is already terminal
    pub fn begin_attempt(&mut self) -> Option<u32> {
        let attempt = match self.state {
            DownloadState::Pending => 0,
            DownloadState::Retrying(n) | DownloadState::Attempting(n) => n,
            DownloadState::Succeeded | DownloadState::FailedTerminal => return None,
        };
        self.attempt = attempt;
        self.state = DownloadState::Attempting(attempt);
        Some(attempt)
    }

    /// Marks the current attempt successful
    pub fn succeed(&mut self) {
        self.state = DownloadState::Succeeded;
    }

    /// Records a failed attempt and decides whether to retry
    pub fn fail(&mut self, error: impl Into<String>) -> Transition {
        self.last_error = Some(error.into());

        if self.attempt < self.policy.max_retries {
            let next_attempt = self.attempt + 1;
            self.state = DownloadState::Retrying(next_attempt);
            Transition::Retry {
                next_attempt,
                delay: self.policy.delay_after(self.attempt),
            }
        } else {
            self.state = DownloadState::FailedTerminal;
            Transition::Fail
        }
    }
}
