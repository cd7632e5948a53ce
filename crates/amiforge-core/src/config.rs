//! Pipeline tuning configuration.
//!
//! Provides [`PipelineConfig`]. Values are loaded from environment variables,
//! falling back to the defaults the import service expects.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Default upload part size (10 MiB).
pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

/// Pipeline configuration.
///
/// # Examples
///
/// ```
/// use amiforge_core::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.part_size, 10 * 1024 * 1024);
/// assert_eq!(config.max_attempts, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Size in bytes of every uploaded part except the last.
    #[builder(default = DEFAULT_PART_SIZE)]
    pub part_size: usize,

    /// Seconds to sleep between status polls.
    #[builder(default = 10)]
    pub poll_interval_secs: u64,

    /// Total attempts made by retrying calls before giving up.
    #[builder(default = 10)]
    pub max_attempts: u32,

    /// Seconds allowed for connecting, writing, or reading a single request.
    #[builder(default = 60)]
    pub io_timeout_secs: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            poll_interval_secs: 10,
            max_attempts: 10,
            io_timeout_secs: 60,
            log_level: String::from("info"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `AMIFORGE_PART_SIZE` | `10485760` |
    /// | `AMIFORGE_POLL_INTERVAL_SECS` | `10` |
    /// | `AMIFORGE_MAX_ATTEMPTS` | `10` |
    /// | `AMIFORGE_IO_TIMEOUT_SECS` | `60` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Unparsable or zero numeric values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_number("AMIFORGE_PART_SIZE") {
            config.part_size = n;
        }
        if let Some(n) = env_number("AMIFORGE_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = n;
        }
        if let Some(n) = env_number("AMIFORGE_MAX_ATTEMPTS") {
            config.max_attempts = n;
        }
        if let Some(n) = env_number("AMIFORGE_IO_TIMEOUT_SECS") {
            config.io_timeout_secs = n;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// The delay between status polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// The per-request I/O timeout.
    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Read a positive number from the environment.
fn env_number<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()?
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
}
