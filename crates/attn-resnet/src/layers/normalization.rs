//! # Normalization Wrapper
//!
//! Provides support for channel-axis ``burn::nn`` norm layers:
//! * [`NormalizationConfig::Batch`] - [`BatchNorm`]
//! * [`NormalizationConfig::Group`] - [`GroupNorm`]
//!
//! The enum is non-exhaustive, to prepare for future additions.

use crate::errors::{ConfigError, check_divisible, check_non_zero};
use burn::nn::{BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Keras ``BatchNormalization`` epsilon.
pub const KERAS_BATCH_NORM_EPSILON: f64 = 1e-3;

/// Keras ``BatchNormalization`` momentum (0.99), in burn's convention.
///
/// Burn weights the *new* batch statistics by `momentum`.
pub const KERAS_BATCH_NORM_MOMENTUM: f64 = 0.01;

/// [`Normalization`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// [`BatchNorm`] Configuration.
    Batch(BatchNormConfig),

    /// [`GroupNorm`] Configuration.
    Group(GroupNormConfig),
}

impl Default for NormalizationConfig {
    /// Keras-flavored [`BatchNorm`]; features are matched at use sites.
    fn default() -> Self {
        BatchNormConfig::new(0)
            .with_epsilon(KERAS_BATCH_NORM_EPSILON)
            .with_momentum(KERAS_BATCH_NORM_MOMENTUM)
            .into()
    }
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<GroupNormConfig> for NormalizationConfig {
    fn from(config: GroupNormConfig) -> Self {
        Self::Group(config)
    }
}

impl NormalizationConfig {
    /// A [`GroupNorm`] config with `num_groups` groups.
    pub fn group(num_groups: usize) -> Self {
        GroupNormConfig::new(num_groups, 0).into()
    }

    /// Initialize a [`Normalization`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            NormalizationConfig::Batch(config) => Normalization::Batch(config.init(device)),
            NormalizationConfig::Group(config) => Normalization::Group(config.init(device)),
        }
    }

    /// Adjust a norm config to the feature size.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            NormalizationConfig::Batch(config) => BatchNormConfig {
                num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Group(config) => GroupNormConfig {
                num_channels: num_features,
                ..config
            }
            .into(),
        }
    }

    /// Check that a norm over `num_features` channels can be built.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Zero`] for zero features or groups;
    /// [`ConfigError::Indivisible`] when the channels do not split into
    /// the configured groups.
    pub fn try_validate_features(
        &self,
        num_features: usize,
    ) -> Result<(), ConfigError> {
        check_non_zero("num_features", num_features)?;
        if let NormalizationConfig::Group(config) = self {
            check_non_zero("num_groups", config.num_groups)?;
            check_divisible("num_channels", num_features, config.num_groups)?;
        }
        Ok(())
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            NormalizationConfig::Batch(config) => config.num_features,
            NormalizationConfig::Group(config) => config.num_channels,
        }
    }
}

/// Normalization Layer Wrapper.
///
/// The enum is non-exhaustive, to prepare for future additions.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// [`BatchNorm`] layer; restricted to `BatchNorm<B, 2>`.
    Batch(BatchNorm<B, 2>),

    /// [`GroupNorm`] layer.
    Group(GroupNorm<B>),
}

impl<B: Backend> From<BatchNorm<B, 2>> for Normalization<B> {
    fn from(layer: BatchNorm<B, 2>) -> Self {
        Self::Batch(layer)
    }
}

impl<B: Backend> From<GroupNorm<B>> for Normalization<B> {
    fn from(layer: GroupNorm<B>) -> Self {
        Self::Group(layer)
    }
}

impl<B: Backend> Normalization<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, num_features, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_features, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Normalization::Batch(norm) => norm.forward(input),
            Normalization::Group(norm) => norm.forward(input),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            Normalization::Batch(norm) => norm.gamma.shape().dims[0],
            Normalization::Group(norm) => norm.num_channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_default_is_keras_batch_norm() {
        let config = NormalizationConfig::default();
        match &config {
            NormalizationConfig::Batch(inner) => {
                assert_eq!(inner.epsilon, KERAS_BATCH_NORM_EPSILON);
                assert_eq!(inner.momentum, KERAS_BATCH_NORM_MOMENTUM);
            }
            _ => panic!("unexpected config: {config:?}"),
        }
    }

    #[test]
    fn test_with_num_features() {
        let config = NormalizationConfig::default().with_num_features(12);
        assert_eq!(config.num_features(), 12);

        let config = NormalizationConfig::group(4).with_num_features(16);
        assert_eq!(config.num_features(), 16);
    }

    #[test]
    fn test_try_validate_features() {
        let batch = NormalizationConfig::default();
        assert_eq!(batch.try_validate_features(3), Ok(()));
        assert_eq!(
            batch.try_validate_features(0),
            Err(ConfigError::Zero {
                field: "num_features"
            })
        );

        let group = NormalizationConfig::group(4);
        assert_eq!(group.try_validate_features(16), Ok(()));
        assert_eq!(
            group.try_validate_features(18),
            Err(ConfigError::Indivisible {
                field: "num_channels",
                value: 18,
                divisor: 4
            })
        );
        assert_eq!(
            NormalizationConfig::group(0).try_validate_features(8),
            Err(ConfigError::Zero {
                field: "num_groups"
            })
        );
    }

    #[test]
    fn test_batch_norm_forward() {
        let device = Default::default();
        let config = NormalizationConfig::default().with_num_features(3);
        let layer: Normalization<TestBackend> = config.init(&device);
        assert_eq!(layer.num_features(), 3);

        let input = Tensor::random([2, 3, 4, 4], Distribution::Default, &device);
        let expected = match &layer {
            Normalization::Batch(norm) => norm.forward(input.clone()),
            _ => unreachable!(),
        };
        layer
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_group_norm_forward() {
        let device = Default::default();
        let config = NormalizationConfig::group(2).with_num_features(4);
        let layer: Normalization<TestBackend> = config.init(&device);
        assert_eq!(layer.num_features(), 4);

        let input = Tensor::random([2, 4, 3, 3], Distribution::Default, &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [2, 4, 3, 3]);
    }
}
