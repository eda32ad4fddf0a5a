//! Engine configuration
//!
//! Every tunable the engine reads lives here. The daemon deserializes this from its settings
//! file; tests build it with the `with_*` setters.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::StatusCodes;

/// Configuration errors found while validating an [`EngineConfig`]
///
/// All problems are collected so an operator sees the full list at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {}", problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Wrapper endpoint every push is posted to
    pub wrapper_url: String,

    /// Maximum records fetched per client per cycle
    pub bucket_size: u32,

    /// Upper bound on concurrent push jobs for one client
    pub max_workers: usize,

    /// Wrapper connect timeout
    #[serde(with = "crate::serde_duration::millis")]
    pub connect_timeout: Duration,

    /// Wrapper reply timeout
    #[serde(with = "crate::serde_duration::millis")]
    pub reply_timeout: Duration,

    /// Pause between cycles, health polls and reconciliation attempts
    #[serde(with = "crate::serde_duration::millis")]
    pub sleep_time: Duration,

    /// Records first sent longer ago than this are no longer fetched
    #[serde(with = "crate::serde_duration::secs")]
    pub retention_window: Duration,

    /// Time after the first send at which an undelivered record is failed
    #[serde(with = "crate::serde_duration::secs")]
    pub ack_timeout: Duration,

    /// Delay before a record becomes due again
    #[serde(with = "crate::serde_duration::secs")]
    pub next_send_interval: Duration,

    /// Attempts per retry-log statement before the engine halts
    pub max_failed_query_retries: u32,

    /// Grace period for each phase of the pool drain
    #[serde(with = "crate::serde_duration::millis")]
    pub pool_grace_period: Duration,

    /// File holding update statements the database refused
    pub retry_log_path: PathBuf,

    /// How often the daemon checks the route file for changes
    #[serde(with = "crate::serde_duration::secs")]
    pub refresh_interval: Duration,

    /// Overall statuses eligible for a push
    pub statuses_to_push: Vec<i32>,

    /// Status code mapping table
    pub status_codes: StatusCodes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let status_codes = StatusCodes::default();
        Self {
            wrapper_url: "http://127.0.0.1:8080/wrapper".to_string(),
            bucket_size: 50,
            max_workers: 10,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(30),
            sleep_time: Duration::from_secs(5),
            retention_window: Duration::from_secs(86_400),
            ack_timeout: Duration::from_secs(86_400),
            next_send_interval: Duration::from_secs(300),
            max_failed_query_retries: 5,
            pool_grace_period: Duration::from_secs(360),
            retry_log_path: PathBuf::from("FAILED_QUERIES.TXT"),
            refresh_interval: Duration::from_secs(60),
            statuses_to_push: status_codes.deliverable_statuses(),
            status_codes,
        }
    }
}

impl EngineConfig {
    /// Create a configuration pointing at the given wrapper endpoint
    pub fn new(wrapper_url: impl Into<String>) -> Self {
        Self {
            wrapper_url: wrapper_url.into(),
            ..Default::default()
        }
    }

    /// Set the bucket size
    pub fn with_bucket_size(mut self, size: u32) -> Self {
        self.bucket_size = size;
        self
    }

    /// Set the worker cap
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the sleep time
    pub fn with_sleep_time(mut self, sleep: Duration) -> Self {
        self.sleep_time = sleep;
        self
    }

    /// Set the wrapper timeouts
    pub fn with_timeouts(mut self, connect: Duration, reply: Duration) -> Self {
        self.connect_timeout = connect;
        self.reply_timeout = reply;
        self
    }

    /// Set the ack timeout window
    pub fn with_ack_timeout(mut self, window: Duration) -> Self {
        self.ack_timeout = window;
        self
    }

    /// Set the retention window
    pub fn with_retention_window(mut self, window: Duration) -> Self {
        self.retention_window = window;
        self
    }

    /// Set the retry ceiling for retry-log statements
    pub fn with_max_failed_query_retries(mut self, retries: u32) -> Self {
        self.max_failed_query_retries = retries;
        self
    }

    /// Set the pool grace period
    pub fn with_pool_grace_period(mut self, grace: Duration) -> Self {
        self.pool_grace_period = grace;
        self
    }

    /// Set the retry log path
    pub fn with_retry_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.retry_log_path = path.into();
        self
    }

    /// Set the status code table
    pub fn with_status_codes(mut self, codes: StatusCodes) -> Self {
        self.status_codes = codes;
        self
    }

    /// Check every tunable, returning all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.wrapper_url.trim().is_empty() {
            problems.push("wrapper_url may not have been set".to_string());
        }
        if self.bucket_size == 0 {
            problems.push("bucket_size must be greater than 0".to_string());
        }
        if self.max_workers == 0 {
            problems.push("max_workers must be greater than 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            problems.push("connect_timeout must be greater than 0".to_string());
        }
        if self.reply_timeout.is_zero() {
            problems.push("reply_timeout must be greater than 0".to_string());
        }
        if self.sleep_time.is_zero() {
            problems.push("sleep_time must be greater than 0".to_string());
        }
        if self.next_send_interval.is_zero() {
            problems.push("next_send_interval must be greater than 0".to_string());
        }
        if self.ack_timeout.is_zero() {
            problems.push("ack_timeout must be greater than 0".to_string());
        }
        if self.retention_window.is_zero() {
            problems.push("retention_window must be greater than 0".to_string());
        }
        if self.max_failed_query_retries == 0 {
            problems.push("max_failed_query_retries must be greater than 0".to_string());
        }
        if self.pool_grace_period.is_zero() {
            problems.push("pool_grace_period must be greater than 0".to_string());
        }
        if self.retry_log_path.as_os_str().is_empty() {
            problems.push("retry_log_path may not have been set".to_string());
        }
        if self.statuses_to_push.is_empty() {
            problems.push("statuses_to_push may not have been set".to_string());
        }
        problems.extend(self.status_codes.problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }
}
