//! Constants for the download module (concurrency, timeouts, retry limits).

use std::time::Duration;

/// Default ceiling on simultaneous in-flight fetch attempts.
pub const DEFAULT_CONCURRENCY: usize = 200;

/// Default wait for response headers before an attempt is abandoned (30 seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Default maximum gap between body chunks before an attempt counts as stalled (30 seconds).
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 30_000;

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Number of leading content bytes kept for magic-byte sniffing.
pub const SNIFF_LEN: usize = 512;
