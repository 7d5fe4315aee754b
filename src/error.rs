//! Nexus engine errors

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the nexus determination engine
#[derive(Debug, Error)]
pub enum NexusError {
    /// Bad date, state code or amount in an input record. Fatal for the whole run.
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// No threshold rule covers a state/year. Recoverable: downgraded to a report warning.
    #[error("No threshold rule for {state} in {year}")]
    MissingThresholdRule { state: String, year: i32 },

    /// Exposure went below zero after clamping. Internal invariant violation.
    #[error("Negative exposure {exposure} for {state} in {year}")]
    NegativeExposure {
        state: String,
        year: i32,
        exposure: Decimal,
    },

    #[error("Interest computation overflowed for {state} in {year}")]
    InterestOverflow { state: String, year: i32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl NexusError {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        NexusError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Whether the run must abort on this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NexusError::MissingThresholdRule { .. })
    }
}

/// Result type for engine operations
pub type NexusResult<T> = Result<T, NexusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_rule_is_recoverable() {
        let err = NexusError::MissingThresholdRule {
            state: "TX".to_string(),
            year: 2023,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "No threshold rule for TX in 2023");
    }

    #[test]
    fn test_malformed_is_fatal() {
        let err = NexusError::malformed(7, "unparseable date: 2023-13-01");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("line 7"));
    }
}
