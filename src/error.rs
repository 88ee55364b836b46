//! Error types for the yume assistant core.

use crate::host::contract::ContractError;
use crate::scheduler::timeline::TimelineError;

/// Top-level error type for the assistant scheduling core.
#[derive(Debug, thiserror::Error)]
pub enum YumeError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Run timeline persistence error.
    #[error("store error: {0}")]
    Store(#[from] TimelineError),

    /// Decision gateway or context provider error.
    #[error("decision error: {0}")]
    Decision(String),

    /// An external call exceeded its time budget.
    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed host command.
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Scheduler wiring or lifecycle error.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, YumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_names_the_call() {
        let err = YumeError::Timeout {
            what: "decision gateway".to_owned(),
            secs: 120,
        };
        assert_eq!(err.to_string(), "timed out after 120s: decision gateway");
    }

    #[test]
    fn store_errors_convert() {
        let err: YumeError = TimelineError::Corrupt("run-1".to_owned()).into();
        assert!(matches!(err, YumeError::Store(_)));
        assert!(err.to_string().contains("run-1"));
    }
}
