//! Retry supervisor for requests a device may silently drop.
//!
//! The only symptom of a lost request is that no reply ever shows up, so the
//! supervisor fires the request, waits for an externally observed success
//! predicate, and fires again when the window closes. It governs whether a
//! transfer starts producing data at all, never how it ends.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total rounds, including the first request.
    pub max_attempts: u32,
    /// How long a round waits for the predicate before re-sending.
    pub retry_interval: Duration,
    /// Sleep granularity inside a round.
    pub poll_interval: Duration,
    /// Multiplier applied to `retry_interval` after every failed round.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            backoff_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    Exhausted { label: String, attempts: u32 },
    Aborted,
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { label, attempts } => {
                write!(f, "{}: no response after {} attempts", label, attempts)
            }
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl RetryPolicy {
    /// Fire `action`, then poll `succeeded` until it holds or the round's
    /// window closes; repeat up to `max_attempts` rounds. `should_abort` is
    /// checked at the same granularity as the predicate.
    pub fn run<A, S, C>(&self, label: &str, action: A, succeeded: S, should_abort: C) -> Result<(), SupervisorError>
    where
        A: FnMut(),
        S: FnMut() -> bool,
        C: FnMut() -> bool,
    {
        self.rounds(label, true, action, succeeded, should_abort)
    }

    /// Same as `run` for a request the caller has already sent once: the
    /// first round only waits, later rounds re-send.
    pub fn run_resends<A, S, C>(
        &self,
        label: &str,
        action: A,
        succeeded: S,
        should_abort: C,
    ) -> Result<(), SupervisorError>
    where
        A: FnMut(),
        S: FnMut() -> bool,
        C: FnMut() -> bool,
    {
        self.rounds(label, false, action, succeeded, should_abort)
    }

    fn rounds<A, S, C>(
        &self,
        label: &str,
        fire_first: bool,
        mut action: A,
        mut succeeded: S,
        mut should_abort: C,
    ) -> Result<(), SupervisorError>
    where
        A: FnMut(),
        S: FnMut() -> bool,
        C: FnMut() -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut interval = self.retry_interval;

        for attempt in 1..=attempts {
            if attempt > 1 {
                log::debug!(target: "retry", "{}: no response yet, attempt {}/{}", label, attempt, attempts);
            }
            if attempt > 1 || fire_first {
                action();
            }

            let deadline = Instant::now() + interval;
            loop {
                if succeeded() {
                    return Ok(());
                }
                if should_abort() {
                    log::info!(target: "retry", "{}: aborted while waiting", label);
                    return Err(SupervisorError::Aborted);
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(self.poll_interval.min(deadline - now));
            }

            if self.backoff_factor > 1.0 {
                interval = interval.mul_f64(self.backoff_factor);
            }
        }

        log::warn!(target: "retry", "{}: giving up after {} attempts", label, attempts);
        Err(SupervisorError::Exhausted {
            label: label.to_string(),
            attempts,
        })
    }
}
