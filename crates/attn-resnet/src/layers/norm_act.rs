//! # `NormAct` - normalization/activation block.
//!
//! A [`NormAct`] module is a [`Normalization`] layer over the channel axis,
//! followed by an optional [`Activation`] layer.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::normalization::{Normalization, NormalizationConfig};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`NormAct`] Config.
#[derive(Config, Debug)]
pub struct NormActConfig {
    /// The [`Normalization`] config.
    ///
    /// The feature size is replaced by [`NormActConfig::with_num_features`].
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,

    /// The optional [`Activation`] config.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub act: Option<ActivationConfig>,
}

impl Default for NormActConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NormActConfig {
    /// Match the norm features to `num_features`.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        Self {
            norm: self.norm.with_num_features(num_features),
            ..self
        }
    }

    /// The number of features.
    pub fn num_features(&self) -> usize {
        self.norm.num_features()
    }

    /// Initialize a [`NormAct`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NormAct<B> {
        NormAct {
            norm: self.norm.init(device),
            act: self.act.as_ref().map(|act| act.init(device)),
        }
    }
}

/// Sequenced normalization/activation block.
#[derive(Module, Debug)]
pub struct NormAct<B: Backend> {
    /// Internal Norm Layer.
    pub norm: Normalization<B>,

    /// Optional activation layer.
    pub act: Option<Activation<B>>,
}

impl<B: Backend> NormAct<B> {
    /// The number of features.
    pub fn num_features(&self) -> usize {
        self.norm.num_features()
    }

    /// Forward Pass.
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
        let x = self.norm.forward(input);
        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}
