//! Remote fetching: HTTP attempts, retries and the concurrency ceiling.
//!
//! - [`HttpClient`] performs one attempt, streaming the body to a staging
//!   file under connection and stall timeouts.
//! - [`FetchTask`] is the per-resource state machine deciding what a failed
//!   attempt means.
//! - [`DownloadCoordinator`] runs tasks under a global slot limit, releasing
//!   the slot between attempts.
//!
//! Errors are [`DownloadError`] values whose [`DownloadError::reason`] names
//! the failure category reported per resource.

mod client;
mod constants;
mod coordinator;
mod error;
mod retry;
mod task;

pub use client::{BasicAuth, FetchRequest, FetchedFile, HttpClient, Timeouts};
pub use constants::{
    DEFAULT_CONCURRENCY, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_STALL_TIMEOUT_MS,
    MAX_RETRY_AFTER, SNIFF_LEN,
};
pub use coordinator::{DownloadCoordinator, DownloadStats};
pub use error::{DownloadError, FailureReason};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after, retry_after_delay,
};
pub use task::{FailureOutcome, FetchState, FetchTask};
