//! Per-resource fetch lifecycle as an explicit state machine.
//!
//! ```text
//! Queued ──begin──▶ InFlight ──complete──▶ Succeeded
//!    ▲                 │
//!    │               fail (stall passes through Stalled)
//!    │                 ▼
//!    └──requeue── Retrying            Failed (terminal)
//! ```
//!
//! The coordinator owns the concurrency slot; a task only records which
//! state it is in and decides, through the [`RetryPolicy`], what a failure
//! means. Keeping it free of IO makes every transition unit-testable.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::retry::{RetryDecision, RetryPolicy, classify_error, retry_after_delay};
use super::{DownloadError, FailureType, FetchRequest};

/// Where a fetch task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Waiting for a concurrency slot.
    Queued,
    /// Holding a slot with an attempt in progress.
    InFlight,
    /// The in-flight attempt stopped receiving bytes.
    Stalled,
    /// Slot released, waiting out the backoff before re-queueing.
    Retrying,
    /// Content fully received.
    Succeeded,
    /// No further attempts will be made.
    Failed,
}

impl FetchState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::InFlight => "in-flight",
            Self::Stalled => "stalled",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// What the coordinator should do after a failed attempt.
#[derive(Debug)]
pub enum FailureOutcome {
    /// Sleep for `delay` outside any slot, then re-queue.
    Retry { delay: Duration },
    /// Give up and report this error.
    Terminal(DownloadError),
}

/// One remote resource moving through the fetch lifecycle.
#[derive(Debug)]
pub struct FetchTask {
    request: FetchRequest,
    target_temp_path: PathBuf,
    max_attempts: u32,
    attempts_made: u32,
    state: FetchState,
}

impl FetchTask {
    #[must_use]
    pub fn new(request: FetchRequest, target_temp_path: PathBuf, max_attempts: u32) -> Self {
        Self {
            request,
            target_temp_path,
            max_attempts: max_attempts.max(1),
            attempts_made: 0,
            state: FetchState::Queued,
        }
    }

    #[must_use]
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.request.url
    }

    #[must_use]
    pub fn target_temp_path(&self) -> &std::path::Path {
        &self.target_temp_path
    }

    #[must_use]
    pub fn state(&self) -> FetchState {
        self.state
    }

    #[must_use]
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    #[must_use]
    pub fn retries_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_made)
    }

    /// Queued → InFlight. Returns the 1-indexed attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTransition`] unless the task is queued.
    pub fn begin_attempt(&mut self) -> Result<u32, DownloadError> {
        self.expect_state(&[FetchState::Queued], "begin an attempt")?;
        self.attempts_made += 1;
        self.state = FetchState::InFlight;
        Ok(self.attempts_made)
    }

    /// InFlight → Succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTransition`] unless an attempt is in flight.
    pub fn complete(&mut self) -> Result<(), DownloadError> {
        self.expect_state(&[FetchState::InFlight], "complete")?;
        self.state = FetchState::Succeeded;
        Ok(())
    }

    /// Records a failed attempt and decides whether to retry.
    ///
    /// Permanent failures are reported as-is. Transient failures retry until
    /// the attempt budget is spent, then become
    /// [`DownloadError::RetriesExhausted`] wrapping the last error. A
    /// `Retry-After` on 429/503 replaces the computed backoff.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTransition`] unless an attempt is in flight.
    pub fn fail(
        &mut self,
        error: DownloadError,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome, DownloadError> {
        self.expect_state(&[FetchState::InFlight], "fail")?;
        if matches!(error, DownloadError::StallTimeout { .. }) {
            self.state = FetchState::Stalled;
            debug!(url = %self.request.url, attempt = self.attempts_made, "attempt stalled");
        }

        let failure_type = classify_error(&error);
        let decision = if self.retries_remaining() == 0 {
            RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            }
        } else {
            policy.should_retry(failure_type, self.attempts_made)
        };

        match decision {
            RetryDecision::Retry { delay, .. } => {
                self.state = FetchState::Retrying;
                Ok(FailureOutcome::Retry {
                    delay: retry_after_delay(&error).unwrap_or(delay),
                })
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(url = %self.request.url, %reason, "not retrying");
                self.state = FetchState::Failed;
                Ok(FailureOutcome::Terminal(
                    if failure_type == FailureType::Permanent {
                        error
                    } else {
                        DownloadError::RetriesExhausted {
                            url: self.request.url.clone(),
                            attempts: self.attempts_made,
                            last: Box::new(error),
                        }
                    },
                ))
            }
        }
    }

    /// Retrying → Queued, once the backoff has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTransition`] unless the task is retrying.
    pub fn requeue(&mut self) -> Result<(), DownloadError> {
        self.expect_state(&[FetchState::Retrying], "re-queue")?;
        self.state = FetchState::Queued;
        Ok(())
    }

    fn expect_state(&self, allowed: &[FetchState], event: &'static str) -> Result<(), DownloadError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DownloadError::InvalidTransition {
                url: self.request.url.clone(),
                state: self.state,
                event,
            })
        }
    }
}
