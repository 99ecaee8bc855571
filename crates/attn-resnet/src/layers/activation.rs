//! # Activation Layers
//!
//! [`ActivationConfig`] selects one of the shape-preserving `burn::nn`
//! activations; models which take "no activation" hold an
//! `Option<ActivationConfig>`.
//!
//! Activations can also be selected by their conventional lowercase name,
//! see [`ActivationConfig::from_name`].
use crate::errors::ConfigError;
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Negative slope used by TensorFlow's ``leaky_relu``.
pub const TF_LEAKY_RELU_SLOPE: f64 = 0.2;

/// The names accepted by [`ActivationConfig::from_name`].
pub const ACTIVATION_NAMES: [&str; 6] = ["relu", "leaky_relu", "prelu", "gelu", "sigmoid", "tanh"];

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu`].
    Relu,

    /// [`LeakyRelu`], with a configurable slope.
    LeakyRelu(LeakyReluConfig),

    /// [`PRelu`], with a learned slope.
    PRelu(PReluConfig),

    /// [`Gelu`].
    Gelu,

    /// [`Sigmoid`].
    Sigmoid,

    /// [`Tanh`].
    Tanh,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl ActivationConfig {
    /// A [`LeakyRelu`] with the TensorFlow default slope.
    pub fn leaky_relu() -> Self {
        LeakyReluConfig::new()
            .with_negative_slope(TF_LEAKY_RELU_SLOPE)
            .into()
    }

    /// Look up an activation by name.
    ///
    /// `"none"` selects no activation.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownActivation`] for names outside
    /// [`ACTIVATION_NAMES`].
    pub fn from_name(name: &str) -> Result<Option<Self>, ConfigError> {
        Ok(Some(match name {
            "none" => return Ok(None),
            "relu" => Self::Relu,
            "leaky_relu" => Self::leaky_relu(),
            "prelu" => PReluConfig::new().into(),
            "gelu" => Self::Gelu,
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            _ => return Err(ConfigError::UnknownActivation(name.to_string())),
        }))
    }

    /// The conventional lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::LeakyRelu(_) => "leaky_relu",
            Self::PRelu(_) => "prelu",
            Self::Gelu => "gelu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        }
    }

    /// Initialize an [`Activation`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            Self::Relu => Activation::Relu(Relu),
            Self::LeakyRelu(config) => Activation::LeakyRelu(config.init()),
            Self::PRelu(config) => Activation::PRelu(config.init(device)),
            Self::Gelu => Activation::Gelu(Gelu),
            Self::Sigmoid => Activation::Sigmoid(Sigmoid),
            Self::Tanh => Activation::Tanh(Tanh),
        }
    }
}

/// An activation layer.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// [`Relu`].
    Relu(Relu),

    /// [`LeakyRelu`].
    LeakyRelu(LeakyRelu),

    /// [`PRelu`].
    PRelu(PRelu<B>),

    /// [`Gelu`].
    Gelu(Gelu),

    /// [`Sigmoid`].
    Sigmoid(Sigmoid),

    /// [`Tanh`].
    Tanh(Tanh),
}

impl<B: Backend> Activation<B> {
    /// Apply the activation elementwise; any rank.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Relu(act) => act.forward(input),
            Self::LeakyRelu(act) => act.forward(input),
            Self::PRelu(act) => act.forward(input),
            Self::Gelu(act) => act.forward(input),
            Self::Sigmoid(act) => act.forward(input),
            Self::Tanh(act) => act.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn apply<const D: usize>(
        config: &ActivationConfig,
        input: Tensor<TestBackend, D>,
    ) -> Tensor<TestBackend, D> {
        let device = Default::default();
        config.init::<TestBackend>(&device).forward(input)
    }

    #[test]
    fn test_from_name() {
        for name in ACTIVATION_NAMES {
            let config = ActivationConfig::from_name(name).unwrap().unwrap();
            assert_eq!(config.name(), name);
        }
        assert!(ActivationConfig::from_name("none").unwrap().is_none());
        assert_eq!(
            ActivationConfig::from_name("swish").unwrap_err(),
            ConfigError::UnknownActivation("swish".to_string())
        );
    }

    #[test]
    fn test_relu_is_default() {
        let device = Default::default();
        let input: Tensor<TestBackend, 4> =
            Tensor::random([2, 3, 4, 4], Distribution::Default, &device);

        let output = apply(&ActivationConfig::default(), input.clone());
        output
            .to_data()
            .assert_eq(&Relu.forward(input).to_data(), true);
    }

    #[test]
    fn test_leaky_relu_slope() {
        let device = Default::default();
        let input: Tensor<TestBackend, 1> =
            Tensor::from_data(TensorData::from([-1.0f32, 0.0, 2.0]), &device);

        apply(&ActivationConfig::leaky_relu(), input)
            .to_data()
            .assert_approx_eq::<f32>(
                &TensorData::from([-0.2f32, 0.0, 2.0]),
                Default::default(),
            );
    }

    #[test]
    fn test_bounded_activations() {
        let device = Default::default();
        let input: Tensor<TestBackend, 2> =
            Tensor::from_data(TensorData::from([[-3.0f32, 0.0, 3.0]]), &device);

        apply(&ActivationConfig::Sigmoid, input.clone())
            .to_data()
            .assert_approx_eq::<f32>(
                &Sigmoid.forward(input.clone()).to_data(),
                Default::default(),
            );
        apply(&ActivationConfig::Tanh, input.clone())
            .to_data()
            .assert_approx_eq::<f32>(&input.clone().tanh().to_data(), Default::default());
        apply(&ActivationConfig::Gelu, input.clone())
            .to_data()
            .assert_approx_eq::<f32>(&Gelu.forward(input).to_data(), Default::default());
    }
}
