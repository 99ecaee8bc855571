//! # Bottleneck Block for `ResNet` / `ResNeXt`
//!
//! [`BottleneckBlockMeta`] defines a common meta API for [`BottleneckBlock`]
//! and [`BottleneckBlockConfig`].
//!
//! A [`BottleneckBlock`] contracts to `width` channels with a 1x1 conv,
//! runs a (grouped, strided) 3x3 conv at that width,
//! and expands to `out_planes` with a final 1x1 conv.

use crate::errors::{ConfigError, check_divisible, check_non_zero, check_probability};
use crate::layers::activation::ActivationConfig;
use crate::layers::conv_norm::{ConvNormAct, ConvNormActConfig, ConvNormActMeta};
use crate::layers::norm_act::{NormAct, NormActConfig};
use crate::layers::normalization::NormalizationConfig;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig};
use crate::models::resnet::util::{build_dropout, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Dropout;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Default bottleneck expansion factor.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// Reference base width; `width == planes` at this base width.
pub const BOTTLENECK_BASE_WIDTH: usize = 64;

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// Configures the `width` and `out_planes`.
    fn planes(&self) -> usize;

    /// Control factor for `out_planes()`.
    fn expansion_factor(&self) -> usize;

    /// The number of groups of the 3x3 conv.
    fn cardinality(&self) -> usize;

    /// The width of each group, relative to [`BOTTLENECK_BASE_WIDTH`].
    fn base_width(&self) -> usize;

    /// The width of the inner convs.
    ///
    /// ``width = (planes * base_width / 64) * cardinality``
    fn width(&self) -> usize {
        (self.planes() * self.base_width() / BOTTLENECK_BASE_WIDTH) * self.cardinality()
    }

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// The stride of the 3x3 conv.
    fn stride(&self) -> usize;

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

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Configures the `width` and `out_planes`.
    pub planes: usize,

    /// Control factor for `out_planes()`.
    #[config(default = "BOTTLENECK_EXPANSION")]
    pub expansion_factor: usize,

    /// The number of groups of the 3x3 conv.
    #[config(default = 1)]
    pub cardinality: usize,

    /// The per-group base width.
    #[config(default = "BOTTLENECK_BASE_WIDTH")]
    pub base_width: usize,

    /// The stride of the 3x3 conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Dropout rate applied before the residual add.
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Normalization config.
    ///
    /// The feature size of this config will be replaced
    /// with the appropriate feature size for each layer.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Optional activation config.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub activation: Option<ActivationConfig>,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn cardinality(&self) -> usize {
        self.cardinality
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BottleneckBlockConfig {
    /// The shared norm/act config.
    pub fn norm_act(&self) -> NormActConfig {
        NormActConfig::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone())
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        check_non_zero("planes", self.planes)?;
        check_non_zero("expansion_factor", self.expansion_factor)?;
        check_non_zero("cardinality", self.cardinality)?;
        check_non_zero("stride", self.stride)?;
        check_non_zero("width", self.width())?;
        check_divisible("width", self.width(), self.cardinality)?;
        check_probability("drop_rate", self.drop_rate)?;
        self.normalization.try_validate_features(self.in_planes)?;
        self.normalization.try_validate_features(self.width())?;
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}\n{self:#?}");
        }
    }

    /// Initialize a [`BottleneckBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        self.expect_valid();

        let in_planes = self.in_planes();
        let width = self.width();
        let out_planes = self.out_planes();
        let norm_act = self.norm_act();

        BottleneckBlock {
            base_width: self.base_width,
            expansion_factor: self.expansion_factor,

            norm_act: norm_act.clone().with_num_features(in_planes).init(device),
            shortcut: ShortcutConfig::new(in_planes, out_planes)
                .with_stride(self.stride)
                .init(device),

            contract: ConvNormActConfig::same(in_planes, width, 1, 1)
                .with_norm_act_or_bias(Some(norm_act.clone()))
                .init(device),
            conv: ConvNormActConfig::same(width, width, 3, self.stride)
                .with_groups(self.cardinality)
                .with_norm_act_or_bias(Some(norm_act))
                .init(device),
            expand: ConvNormActConfig::same(width, out_planes, 1, 1)
                .with_norm_act_or_bias(None)
                .init(device),

            dropout: build_dropout(self.drop_rate),
        }
    }
}

/// Pre-activation Bottleneck Block for `ResNet`.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Base width.
    pub base_width: usize,

    /// Expansion factor.
    pub expansion_factor: usize,

    /// Input pre-activation.
    pub norm_act: NormAct<B>,

    /// Residual shortcut.
    pub shortcut: Shortcut<B>,

    /// 1x1 contraction, with norm/act.
    pub contract: ConvNormAct<B>,

    /// Grouped, strided 3x3 conv, with norm/act.
    pub conv: ConvNormAct<B>,

    /// 1x1 expansion, no norm.
    pub expand: ConvNormAct<B>,

    /// Optional dropout.
    pub dropout: Option<Dropout>,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.contract.in_channels()
    }

    fn planes(&self) -> usize {
        self.out_planes() / self.expansion_factor()
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn cardinality(&self) -> usize {
        self.conv.groups()
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn width(&self) -> usize {
        self.conv.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.expand.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*expansion_factor, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let x = self.norm_act.forward(input.clone());
        let identity = self.shortcut.forward(input, x.clone());

        let x = self.contract.forward(x);
        let x = self.conv.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "width", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("width", self.width()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        let x = self.expand.forward(x);

        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        identity + x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::shortcut::{ShortcutKind, ShortcutMeta};
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_bottleneck_config() {
        let config = BottleneckBlockConfig::new(64, 64);
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.planes(), 64);
        assert_eq!(config.width(), 64);
        assert_eq!(config.out_planes(), 256);
        assert_eq!(config.stride(), 1);
        config.expect_valid();

        let config = config.with_stride(2).with_expansion_factor(2);
        assert_eq!(config.out_planes(), 128);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    fn test_resnext_width() {
        let config = BottleneckBlockConfig::new(256, 64)
            .with_cardinality(32)
            .with_base_width(4);
        assert_eq!(config.width(), 128);
        assert_eq!(config.out_planes(), 256);
        config.expect_valid();

        let config = BottleneckBlockConfig::new(512, 128)
            .with_cardinality(32)
            .with_base_width(4);
        assert_eq!(config.width(), 256);
    }

    #[test]
    fn test_bottleneck_validation() {
        assert_eq!(
            BottleneckBlockConfig::new(16, 0).try_validate(),
            Err(ConfigError::Zero { field: "planes" })
        );
        assert_eq!(
            BottleneckBlockConfig::new(16, 4)
                .with_base_width(8)
                .try_validate(),
            Err(ConfigError::Zero { field: "width" })
        );
        assert!(
            BottleneckBlockConfig::new(16, 4)
                .with_drop_rate(2.0)
                .try_validate()
                .is_err()
        );

        // The grouped conv width must split into the norm groups.
        assert_eq!(
            BottleneckBlockConfig::new(32, 24)
                .with_normalization(NormalizationConfig::group(16))
                .try_validate(),
            Err(ConfigError::Indivisible {
                field: "num_channels",
                value: 24,
                divisor: 16
            })
        );
        BottleneckBlockConfig::new(32, 24)
            .with_normalization(NormalizationConfig::group(8))
            .expect_valid();
    }

    #[test]
    #[should_panic(expected = "cardinality must be non-zero")]
    fn test_bottleneck_init_invalid() {
        let device = Default::default();
        let _block: BottleneckBlock<NdArray> = BottleneckBlockConfig::new(16, 4)
            .with_cardinality(0)
            .init(&device);
    }

    #[test]
    fn test_bottleneck_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 4)
            .with_stride(2)
            .init(&device);

        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.planes(), 4);
        assert_eq!(block.width(), 4);
        assert_eq!(block.cardinality(), 1);
        assert_eq!(block.out_planes(), 16);
        assert_eq!(block.stride(), 2);
        assert_eq!(block.shortcut.kind(), ShortcutKind::Projection);
        assert!(!block.expand.has_norm_act());
    }

    #[test]
    fn test_bottleneck_forward_projection_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(4, 2)
            .with_stride(2)
            .with_drop_rate(0.1)
            .init(&device);

        let input = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 8),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );
    }

    #[test]
    fn test_bottleneck_forward_pool_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 2)
            .with_stride(2)
            .init(&device);
        assert_eq!(block.shortcut.kind(), ShortcutKind::Pool);

        let input = Tensor::random([1, 8, 4, 6], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [1, 8, 2, 3]);
    }
}
