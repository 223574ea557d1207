//! Engine settings read from the environment.
//!
//! The engine is configured through four plain integers. Each one has a
//! documented default and can be overridden by an environment variable:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `INGEST_CONCURRENT_DOWNLOAD` | concurrency ceiling | 200 |
//! | `INGEST_CONNECTION_TIMEOUT` | connection timeout (ms) | 30000 |
//! | `INGEST_STALL_TIMEOUT` | stall timeout (ms) | 30000 |
//! | `INGEST_STALL_RETRY_LIMIT` | attempts per resource | 3 |

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_STALL_TIMEOUT_MS,
};

pub const ENV_CONCURRENCY: &str = "INGEST_CONCURRENT_DOWNLOAD";
pub const ENV_CONNECTION_TIMEOUT: &str = "INGEST_CONNECTION_TIMEOUT";
pub const ENV_STALL_TIMEOUT: &str = "INGEST_STALL_TIMEOUT";
pub const ENV_RETRY_LIMIT: &str = "INGEST_STALL_RETRY_LIMIT";

const MAX_CONCURRENCY: usize = 1000;
const MAX_TIMEOUT_MS: u64 = 3_600_000;
const MAX_ATTEMPTS: u32 = 10;

/// Invalid engine configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but is not an integer.
    #[error("invalid value for `{name}`: {value:?} is not a non-negative integer")]
    NotAnInteger {
        /// Setting or variable name.
        name: &'static str,
        /// The raw value.
        value: String,
    },

    /// A value is outside its accepted range.
    #[error("invalid value for `{name}`: {value}. Expected range: {min}..={max}")]
    OutOfRange {
        /// Setting or variable name.
        name: &'static str,
        /// The offending value.
        value: u64,
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },
}

/// Tunables for the download coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum simultaneous in-flight fetch attempts.
    pub concurrency: usize,
    /// Maximum wait for response headers.
    pub connection_timeout: Duration,
    /// Maximum gap between received body chunks.
    pub stall_timeout: Duration,
    /// Attempts per resource, including the first.
    pub max_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connection_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            stall_timeout: Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_RETRIES,
        }
    }
}

impl EngineSettings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set to an unparsable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    ///
    /// Unset and blank variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value is unparsable or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(value) = read_integer(&lookup, ENV_CONCURRENCY)? {
            settings.concurrency = usize::try_from(value).unwrap_or(usize::MAX);
        }
        if let Some(value) = read_integer(&lookup, ENV_CONNECTION_TIMEOUT)? {
            settings.connection_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_integer(&lookup, ENV_STALL_TIMEOUT)? {
            settings.stall_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_integer(&lookup, ENV_RETRY_LIMIT)? {
            settings.max_attempts = u32::try_from(value).unwrap_or(u32::MAX);
        }

        settings.validate()?;
        debug!(?settings, "engine settings resolved");
        Ok(settings)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            ENV_CONCURRENCY,
            self.concurrency as u64,
            1,
            MAX_CONCURRENCY as u64,
        )?;
        check_range(
            ENV_CONNECTION_TIMEOUT,
            duration_ms(self.connection_timeout),
            1,
            MAX_TIMEOUT_MS,
        )?;
        check_range(
            ENV_STALL_TIMEOUT,
            duration_ms(self.stall_timeout),
            1,
            MAX_TIMEOUT_MS,
        )?;
        check_range(
            ENV_RETRY_LIMIT,
            u64::from(self.max_attempts),
            1,
            u64::from(MAX_ATTEMPTS),
        )
    }
}

fn read_integer<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::NotAnInteger { name, value: raw })
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
