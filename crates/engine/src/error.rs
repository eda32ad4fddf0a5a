//! Engine-level errors

use crate::config::ConfigError;
use crate::retry_log::RetryLogError;
use crate::wrapper::WrapperError;

/// Errors surfaced by a push cycle
///
/// Everything a single job or a single client runs into is logged and absorbed. Only the
/// variants here reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A stored update could not be applied within the retry budget
    ///
    /// This is fatal: dispatching new pushes while an older outcome is unapplied could
    /// overwrite it with stale state. The statement stays in the retry log.
    #[error("retry log statement failed after {attempts} attempts: {statement}")]
    ReconciliationExhausted { statement: String, attempts: u32 },

    /// The retry log could not be read or rewritten
    #[error(transparent)]
    RetryLog(#[from] RetryLogError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("wrapper client: {0}")]
    Wrapper(#[from] WrapperError),
}
