//! # Squeeze-and-Excitation channel gating.
//!
//! [`SqueezeAttention2d`] rescales each channel of a feature map by a gate
//! computed from the globally pooled channel statistics:
//!
//! ```text
//! gate = sigmoid(fc2(relu(fc1(mean_hw(x)))))
//! out = x * gate
//! ```

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::sigmoid;

/// Default squeeze reduction ratio.
pub const SQUEEZE_DEFAULT_REDUCTION: usize = 16;

/// [`SqueezeAttention2d`] Meta.
pub trait SqueezeAttention2dMeta {
    /// The number of gated channels.
    fn channels(&self) -> usize;

    /// The width of the squeezed bottleneck.
    fn squeeze_channels(&self) -> usize;
}

/// [`SqueezeAttention2d`] Config.
#[derive(Config, Debug)]
pub struct SqueezeAttention2dConfig {
    /// The number of gated channels.
    pub channels: usize,

    /// The squeeze reduction ratio.
    #[config(default = "SQUEEZE_DEFAULT_REDUCTION")]
    pub reduction: usize,
}

impl SqueezeAttention2dMeta for SqueezeAttention2dConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn squeeze_channels(&self) -> usize {
        (self.channels / self.reduction.max(1)).max(1)
    }
}

impl SqueezeAttention2dConfig {
    /// Initialize a [`SqueezeAttention2d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SqueezeAttention2d<B> {
        let squeeze = self.squeeze_channels();
        SqueezeAttention2d {
            reduce: LinearConfig::new(self.channels, squeeze).init(device),
            act: Relu,
            expand: LinearConfig::new(squeeze, self.channels).init(device),
        }
    }
}

/// Squeeze-and-Excitation gating layer.
#[derive(Module, Debug)]
pub struct SqueezeAttention2d<B: Backend> {
    /// Squeeze projection.
    pub reduce: Linear<B>,
    /// Squeeze activation.
    pub act: Relu,
    /// Excitation projection.
    pub expand: Linear<B>,
}

impl<B: Backend> SqueezeAttention2dMeta for SqueezeAttention2d<B> {
    fn channels(&self) -> usize {
        self.reduce.weight.shape().dims[0]
    }

    fn squeeze_channels(&self) -> usize {
        self.reduce.weight.shape().dims[1]
    }
}

impl<B: Backend> SqueezeAttention2d<B> {
    /// Compute the channel gate.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels]`` gate values in ``(0, 1)``.
    pub fn gate(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let channels = self.channels();
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", channels)],
        );

        let x = input.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        let x = self.reduce.forward(x);
        let x = self.act.forward(x);
        let x = self.expand.forward(x);
        sigmoid(x)
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, _, _] = input.dims();
        let gate = self.gate(input.clone()).reshape([batch, channels, 1, 1]);
        input * gate
    }
}
