//! # Config Validation Errors

use thiserror::Error;

/// Errors raised when lowering or validating a model config.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Per-stack settings disagree in length.
    #[error("per-stack settings disagree in length: {field} has {actual} entries, expected {expected}")]
    StackLengthMismatch {
        /// The offending field.
        field: &'static str,
        /// The expected number of stacks.
        expected: usize,
        /// The provided number of entries.
        actual: usize,
    },

    /// A value which must be non-zero was zero.
    #[error("{field} must be non-zero")]
    Zero {
        /// The offending field.
        field: &'static str,
    },

    /// A stack has no blocks.
    #[error("stack has no blocks")]
    EmptyStack,

    /// Adjacent blocks disagree on the number of planes.
    #[error("block[{prev}].out_planes({out_planes}) != block[{next}].in_planes({in_planes})")]
    PlaneMismatch {
        /// Index of the earlier block.
        prev: usize,
        /// Output planes of the earlier block.
        out_planes: usize,
        /// Index of the later block.
        next: usize,
        /// Input planes of the later block.
        in_planes: usize,
    },

    /// The input resolution is not divisible by the total network stride.
    #[error("input resolution {resolution:?} is not divisible by the total stride {stride}")]
    Resolution {
        /// The input resolution.
        resolution: [usize; 2],
        /// The total stride.
        stride: usize,
    },

    /// A dimension is not divisible by the number of groups or heads.
    #[error("{field}({value}) is not divisible by {divisor}")]
    Indivisible {
        /// The offending field.
        field: &'static str,
        /// The value.
        value: usize,
        /// The required divisor.
        divisor: usize,
    },

    /// Relative position embeddings were requested without a fixed resolution.
    #[error("positional embeddings require a fixed attention resolution")]
    MissingResolution,

    /// A probability was out of range.
    #[error("{field} must be in [0, 1], got {value}")]
    Probability {
        /// The offending field.
        field: &'static str,
        /// The value.
        value: f64,
    },

    /// No activation is known by the name.
    #[error("unknown activation: {0:?}")]
    UnknownActivation(String),

    /// No prefab is registered under the name.
    #[error("unknown prefab: {0:?}")]
    UnknownPrefab(String),
}

/// Check that a probability lies in ``[0, 1]``.
pub fn check_probability(
    field: &'static str,
    value: f64,
) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Probability { field, value })
    }
}

/// Check that a value is non-zero.
pub fn check_non_zero(
    field: &'static str,
    value: usize,
) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(value)
    }
}

/// Check that a value is divisible by a divisor.
pub fn check_divisible(
    field: &'static str,
    value: usize,
    divisor: usize,
) -> Result<usize, ConfigError> {
    if divisor == 0 || value % divisor != 0 {
        Err(ConfigError::Indivisible {
            field,
            value,
            divisor,
        })
    } else {
        Ok(value / divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_check_probability() {
        assert_eq!(check_probability("p", 0.25), Ok(0.25));
        assert_that!(check_probability("p", 1.5).is_err(), is(equal_to(true)));
        assert_eq!(
            check_probability("drop_rate", -0.1).unwrap_err().to_string(),
            "drop_rate must be in [0, 1], got -0.1"
        );
    }

    #[test]
    fn test_check_divisible() {
        assert_eq!(check_divisible("dk", 32, 8), Ok(4));
        assert_eq!(
            check_divisible("dv", 10, 4),
            Err(ConfigError::Indivisible {
                field: "dv",
                value: 10,
                divisor: 4
            })
        );
        assert!(check_divisible("dv", 10, 0).is_err());
    }

    #[test]
    fn test_check_non_zero() {
        assert_eq!(check_non_zero("stride", 2), Ok(2));
        assert_eq!(
            check_non_zero("stride", 0),
            Err(ConfigError::Zero { field: "stride" })
        );
    }
}
