//! # Input Stem
//!
//! A [`ResNetStem`] is a 7x7 stride-2 conv (no norm), followed by
//! zero-padded 3x3 stride-2 max pooling; a total reduction of 4.

use crate::layers::conv_norm::{ConvNormAct, ConvNormActConfig, ConvNormActMeta};
use crate::models::resnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// The total stem reduction.
pub const STEM_STRIDE: usize = 4;

/// Default stem width.
pub const STEM_DEFAULT_WIDTH: usize = 64;

/// [`ResNetStem`] Meta API.
pub trait ResNetStemMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The number of output channels.
    fn stem_width(&self) -> usize;

    /// The total stem reduction.
    fn stride(&self) -> usize {
        STEM_STRIDE
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// The number of input channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The number of output channels.
    #[config(default = "STEM_DEFAULT_WIDTH")]
    pub stem_width: usize,
}

impl ResNetStemMeta for ResNetStemConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn stem_width(&self) -> usize {
        self.stem_width
    }
}

impl ResNetStemConfig {
    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        ResNetStem {
            conv: ConvNormActConfig::same(self.in_channels, self.stem_width, 7, 2)
                .with_norm_act_or_bias(None)
                .init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Valid)
                .init(),
        }
    }
}

/// `ResNet` input stem.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// The 7x7 stride-2 conv.
    pub conv: ConvNormAct<B>,

    /// The 3x3 stride-2 pool.
    pub pool: MaxPool2d,
}

impl<B: Backend> ResNetStemMeta for ResNetStem<B> {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn stem_width(&self) -> usize {
        self.conv.out_channels()
    }
}

impl<B: Backend> ResNetStem<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*4, in_width=out_width*4]``.
    ///
    /// # Returns
    ///
    /// ``[batch, stem_width, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_channels", self.in_channels()), ("stride", self.stride())],
        );

        let x = self.conv.forward(input);
        // Pool over zero padding.
        let x = self.pool.forward(x.pad((1, 1, 1, 1), 0.0));

        assert_shape_contract_periodically!(
            ["batch", "stem_width", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("stem_width", self.stem_width()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Param;
    use burn::tensor::{Distribution, TensorData};

    #[test]
    fn test_stem_config() {
        let config = ResNetStemConfig::new();
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.stem_width(), 64);
        assert_eq!(config.stride(), 4);
        assert_eq!(config.output_resolution([224, 224]), [56, 56]);
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray;
        let device = Default::default();

        let stem: ResNetStem<B> = ResNetStemConfig::new()
            .with_in_channels(1)
            .with_stem_width(8)
            .init(&device);
        assert_eq!(stem.in_channels(), 1);
        assert_eq!(stem.stem_width(), 8);
        assert!(!stem.conv.has_norm_act());

        let input = Tensor::random([2, 1, 32, 16], Distribution::Default, &device);
        let output = stem.forward(input);
        assert_eq!(output.dims(), [2, 8, 8, 4]);
    }

    #[test]
    fn test_stem_pool_zero_padding() {
        type B = NdArray;
        let device = Default::default();

        let mut stem: ResNetStem<B> = ResNetStemConfig::new()
            .with_in_channels(1)
            .with_stem_width(1)
            .init(&device);

        // A conv producing a constant -1.
        stem.conv.conv.weight = Param::from_tensor(stem.conv.conv.weight.val().zeros_like());
        stem.conv.conv.bias = stem
            .conv
            .conv
            .bias
            .take()
            .map(|bias| Param::from_tensor(bias.val().ones_like().neg()));

        let input = Tensor::ones([1, 1, 8, 8], &device);
        let output = stem.forward(input);

        // Windows touching the padding see 0; the interior window sees -1.
        output.to_data().assert_eq(
            &TensorData::from([[[[0.0f32, 0.0], [0.0, -1.0]]]]),
            true,
        );
    }
}
