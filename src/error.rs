//! Error types.
//!
//! Only malformed network input and invalid configuration surface as errors.
//! Mutation and crossover operators that find nothing legal to act on are
//! silent no-ops and never produce an error.

use thiserror::Error;

/// Errors raised while activating a compiled [`Network`](crate::Network).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The input vector length does not match the network's input count.
    #[error("input arity mismatch: expected {expected} inputs, got {actual}")]
    InputArityMismatch {
        /// Number of input nodes in the network.
        expected: usize,
        /// Length of the vector that was supplied.
        actual: usize,
    },
    /// The output buffer length does not match the network's output count.
    #[error("output arity mismatch: expected {expected} outputs, got {actual}")]
    OutputArityMismatch {
        /// Number of output nodes in the network.
        expected: usize,
        /// Length of the buffer that was supplied.
        actual: usize,
    },
}

/// Errors raised when validating or loading configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A numeric setting is outside its legal range.
    #[error("configuration value `{field}` out of range: {reason}")]
    OutOfRange {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Human-readable constraint that was violated.
        reason: String,
    },
    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(field: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the training loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    /// Network activation failed.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The simulator drives a different number of joints than the body layout declares.
    #[error("simulator reports {actual} joints but the body layout declares {expected}")]
    JointCountMismatch {
        /// Joint count implied by the body layout.
        expected: usize,
        /// Joint count reported by the simulator.
        actual: usize,
    },
}

/// Validate that `value` lies in `[0, 1]`.
pub(crate) fn check_probability(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(
            field,
            format!("{value} is not a probability in [0, 1]"),
        ))
    }
}

/// Validate that `value` is finite and non-negative.
pub(crate) fn check_non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(
            field,
            format!("{value} must be finite and non-negative"),
        ))
    }
}
