//! Bounded-concurrency fetching with per-attempt slots and retries.
//!
//! The coordinator enforces one global ceiling on simultaneous in-flight
//! attempts. A slot is held only for the duration of a single attempt: a
//! failed attempt releases it before backing off, and its retry queues for a
//! new slot behind whoever is already waiting (tokio's semaphore is FIFO).
//!
//! # Example
//!
//! ```no_run
//! use ingester_core::config::EngineSettings;
//! use ingester_core::download::{DownloadCoordinator, FetchRequest, HttpClient, RetryPolicy};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = EngineSettings::default();
//! let coordinator = DownloadCoordinator::new(
//!     &settings,
//!     RetryPolicy::with_max_attempts(settings.max_attempts),
//!     HttpClient::new()?,
//! );
//! let request = FetchRequest::new("https://example.com/logo.png");
//! let fetched = coordinator.fetch(&request, Path::new("/tmp/logo.part")).await?;
//! println!("{} bytes, md5 {}", fetched.size_bytes, fetched.content_hash);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::client::{FetchRequest, FetchedFile, HttpClient, Timeouts};
use super::retry::RetryPolicy;
use super::task::{FailureOutcome, FetchTask};
use super::DownloadError;
use crate::config::EngineSettings;

/// Statistics across every fetch made through one coordinator.
///
/// Uses atomic counters for thread-safe updates from concurrent fetches.
#[derive(Debug, Default)]
pub struct DownloadStats {
    attempts: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of network attempts started, retries included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of successfully completed fetches.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of fetches that ended in a terminal error.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of fetches finished (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }
}

/// Fetches remote resources under a global concurrency ceiling.
#[derive(Debug)]
pub struct DownloadCoordinator {
    client: HttpClient,
    policy: RetryPolicy,
    timeouts: Timeouts,
    concurrency: usize,
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    stats: DownloadStats,
}

impl DownloadCoordinator {
    /// Creates a coordinator using the ceiling and timeouts from `settings`.
    ///
    /// The attempt budget comes from `policy`, which callers normally build
    /// with [`RetryPolicy::with_max_attempts`] from the same settings.
    #[must_use]
    pub fn new(settings: &EngineSettings, policy: RetryPolicy, client: HttpClient) -> Self {
        let concurrency = settings.concurrency.max(1);
        Self {
            client,
            policy,
            timeouts: Timeouts {
                connection: settings.connection_timeout,
                stall: settings.stall_timeout,
            },
            concurrency,
            semaphore: Semaphore::new(concurrency),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            stats: DownloadStats::new(),
        }
    }

    /// Returns the configured concurrency ceiling.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns a reference to the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Attempts currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous in-flight attempts observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Stops handing out slots; queued and future fetches fail with
    /// [`DownloadError::Closed`]. Attempts already in flight finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Fetches `request` into `temp_path`, retrying transient failures.
    ///
    /// Dropping the returned future releases any held slot and removes the
    /// partial file.
    ///
    /// # Errors
    ///
    /// Returns the permanent error of the failing attempt (e.g.
    /// [`DownloadError::HttpStatus`] for a 404), or
    /// [`DownloadError::RetriesExhausted`] once every attempt failed
    /// transiently.
    #[instrument(skip(self, request, temp_path), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        temp_path: &Path,
    ) -> Result<FetchedFile, DownloadError> {
        let mut task = FetchTask::new(
            request.clone(),
            temp_path.to_path_buf(),
            self.policy.max_attempts(),
        );

        loop {
            let permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| DownloadError::Closed {
                    url: request.url.clone(),
                })?;
            let attempt = task.begin_attempt()?;
            self.stats.attempts.fetch_add(1, Ordering::SeqCst);
            debug!(attempt, "attempting fetch");

            let result = {
                let _slot = InFlightSlot::enter(&self.in_flight, &self.peak_in_flight);
                self.client
                    .fetch_once(task.request(), task.target_temp_path(), self.timeouts)
                    .await
            };
            drop(permit);

            let error = match result {
                Ok(fetched) => {
                    task.complete()?;
                    self.stats.completed.fetch_add(1, Ordering::SeqCst);
                    info!(attempt, bytes = fetched.size_bytes, "fetched");
                    return Ok(fetched);
                }
                Err(error) => error,
            };

            let error_text = error.to_string();
            match task.fail(error, &self.policy)? {
                FailureOutcome::Retry { delay } => {
                    info!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error_text,
                        "retrying fetch"
                    );
                    self.stats.retried.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    task.requeue()?;
                }
                FailureOutcome::Terminal(error) => {
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(attempts = task.attempts_made(), reason = %error.reason(), error = %error, "fetch failed");
                    return Err(error);
                }
            }
        }
    }
}

/// Counts an attempt as in flight for as long as it is alive.
struct InFlightSlot<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightSlot<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
