//! # `ResNet` Core Model
//!
//! [`ResNet`] is the core model module.
//!
//! [`ResNetAbstractConfig`] implements [`Config`], and provides
//! a high-level, per-stack configuration interface.
//! It provides [`ResNetAbstractConfig::try_to_structure`] to lower
//! to a [`ResNetConfig`].
//!
//! [`ResNetConfig`] implements [`Config`], and provides
//! [`ResNetConfig::init`] to initialize a [`ResNet`].
//!
//! [`ResNet`] implements [`Module`], and provides
//! [`ResNet::forward_features`], [`ResNet::forward_logits`],
//! and [`ResNet::forward`].

use crate::errors::{ConfigError, check_non_zero, check_probability};
use crate::layers::activation::ActivationConfig;
use crate::layers::attention::squeeze::SQUEEZE_DEFAULT_REDUCTION;
use crate::layers::norm_act::{NormAct, NormActConfig};
use crate::layers::normalization::NormalizationConfig;
use crate::models::resnet::attn_bottleneck::AttentionPolicyConfig;
use crate::models::resnet::bottleneck::BOTTLENECK_BASE_WIDTH;
use crate::models::resnet::residual_block::BlockKind;
use crate::models::resnet::stack::{
    BlockPolicyConfig, ResNetStack, ResNetStackConfig, ResNetStackMeta,
};
use crate::models::resnet::stem::{
    ResNetStem, ResNetStemConfig, ResNetStemMeta, STEM_DEFAULT_WIDTH, STEM_STRIDE,
};
use crate::models::resnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Tensor};
use burn::tensor::activation::softmax;

/// ResNet-18 stack depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// ResNet-34 stack depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-50 stack depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-101 stack depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];

/// Default per-stack filters.
pub const DEFAULT_FILTERS_PER_STACK: [usize; 4] = [64, 128, 256, 512];
/// Default per-stack strides.
pub const DEFAULT_STRIDES: [usize; 4] = [2, 2, 2, 1];

/// [`ResNet`] Meta API.
pub trait ResNetMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The number of feature planes fed to the head.
    fn feature_planes(&self) -> usize;

    /// The number of classes.
    fn num_classes(&self) -> usize;

    /// The total feature reduction.
    fn stride(&self) -> usize;

    /// Get the feature resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn feature_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// High-level [`ResNet`] model configuration.
#[derive(Config, Debug)]
pub struct ResNetAbstractConfig {
    /// The residual block family.
    pub block: BlockKind,

    /// The number of blocks in each stack.
    pub num_repeats: Vec<usize>,

    /// The block planes of each stack.
    #[config(default = "DEFAULT_FILTERS_PER_STACK.to_vec()")]
    pub filters_per_stack: Vec<usize>,

    /// The stride of each stack.
    #[config(default = "DEFAULT_STRIDES.to_vec()")]
    pub strides: Vec<usize>,

    /// Expansion factor override; `None` selects
    /// [`BlockKind::default_expansion`].
    #[config(default = "None")]
    pub expansion: Option<usize>,

    /// Per-block dropout rate.
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Optional activation config.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub activation: Option<ActivationConfig>,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The number of classes.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// The number of input channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The ``[height, width]`` input resolution.
    #[config(default = "[224, 224]")]
    pub input_resolution: [usize; 2],

    /// The stem conv width.
    #[config(default = "STEM_DEFAULT_WIDTH")]
    pub stem_width: usize,

    /// Bottleneck groups.
    #[config(default = 1)]
    pub cardinality: usize,

    /// Bottleneck per-group base width.
    #[config(default = "BOTTLENECK_BASE_WIDTH")]
    pub base_width: usize,

    /// Squeeze gating reduction; `0` selects the default of 16.
    #[config(default = 0)]
    pub squeeze_reduce: usize,

    /// Per-stack self-attention flags; `None` disables self-attention.
    #[config(default = "None")]
    pub self_attn: Option<Vec<bool>>,

    /// Self-attention hyper-parameters.
    #[config(default = "AttentionPolicyConfig::new()")]
    pub attention: AttentionPolicyConfig,
}

impl ResNetAbstractConfig {
    /// ResNet-18.
    pub fn resnet18(num_classes: usize) -> Self {
        Self::new(BlockKind::Basic, RESNET18_BLOCKS.to_vec()).with_num_classes(num_classes)
    }

    /// ResNet-34.
    pub fn resnet34(num_classes: usize) -> Self {
        Self::new(BlockKind::Basic, RESNET34_BLOCKS.to_vec()).with_num_classes(num_classes)
    }

    /// ResNet-50.
    pub fn resnet50(num_classes: usize) -> Self {
        Self::new(BlockKind::Bottleneck, RESNET50_BLOCKS.to_vec()).with_num_classes(num_classes)
    }

    /// ResNet-101.
    pub fn resnet101(num_classes: usize) -> Self {
        Self::new(BlockKind::Bottleneck, RESNET101_BLOCKS.to_vec()).with_num_classes(num_classes)
    }

    /// ResNeXt-50, 32x4d.
    pub fn resnext50_32x4d(num_classes: usize) -> Self {
        Self::resnet50(num_classes)
            .with_cardinality(32)
            .with_base_width(4)
    }

    /// ResNet-50 with squeeze gating in every block.
    pub fn se_resnet50(num_classes: usize) -> Self {
        Self::new(BlockKind::AttnBottleneck, RESNET50_BLOCKS.to_vec())
            .with_num_classes(num_classes)
    }

    /// ResNet-50 with attention-augmented convs in the last two stacks,
    /// and squeeze gating in the first two.
    pub fn aa_resnet50(num_classes: usize) -> Self {
        Self::se_resnet50(num_classes).with_self_attn(Some(vec![false, false, true, true]))
    }

    /// The number of stacks.
    pub fn num_stacks(&self) -> usize {
        self.num_repeats.len()
    }

    /// The effective expansion factor.
    pub fn expansion_factor(&self) -> usize {
        self.expansion
            .unwrap_or_else(|| self.block.default_expansion())
    }

    /// The effective squeeze reduction.
    pub fn squeeze_reduction(&self) -> usize {
        if self.squeeze_reduce == 0 {
            SQUEEZE_DEFAULT_REDUCTION
        } else {
            self.squeeze_reduce
        }
    }

    /// The self-attention flag of a stack.
    pub fn stack_self_attn(
        &self,
        idx: usize,
    ) -> bool {
        self.self_attn
            .as_ref()
            .and_then(|flags| flags.get(idx).copied())
            .unwrap_or(false)
    }

    /// The total feature reduction.
    pub fn total_stride(&self) -> usize {
        self.strides.iter().fold(STEM_STRIDE, |acc, s| acc * s)
    }

    /// The shared block policy.
    pub fn block_policy(&self) -> BlockPolicyConfig {
        BlockPolicyConfig::new(self.block)
            .with_expansion(self.expansion_factor())
            .with_cardinality(self.cardinality)
            .with_base_width(self.base_width)
            .with_squeeze_reduction(self.squeeze_reduction())
            .with_attention(self.attention.clone())
            .with_drop_rate(self.drop_rate)
            .with_normalization(self.normalization.clone())
            .with_activation(self.activation.clone())
    }

    fn check_stack_lengths(&self) -> Result<usize, ConfigError> {
        let expected = self.num_stacks();
        if expected == 0 {
            return Err(ConfigError::EmptyStack);
        }
        let mut lengths = vec![
            ("filters_per_stack", self.filters_per_stack.len()),
            ("strides", self.strides.len()),
        ];
        if let Some(flags) = &self.self_attn {
            lengths.push(("self_attn", flags.len()));
        }
        for (field, actual) in lengths {
            if actual != expected {
                return Err(ConfigError::StackLengthMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }
        Ok(expected)
    }

    /// Lower to a [`ResNetConfig`].
    ///
    /// # Errors
    ///
    /// If the per-stack settings disagree in length, a size is zero,
    /// the input resolution is not divisible by the total stride,
    /// or a block is invalid.
    pub fn try_to_structure(&self) -> Result<ResNetConfig, ConfigError> {
        let num_stacks = self.check_stack_lengths()?;

        check_non_zero("in_channels", self.in_channels)?;
        check_non_zero("stem_width", self.stem_width)?;
        check_non_zero("num_classes", self.num_classes)?;
        check_probability("drop_rate", self.drop_rate)?;
        for idx in 0..num_stacks {
            check_non_zero("num_repeats", self.num_repeats[idx])?;
            check_non_zero("filters_per_stack", self.filters_per_stack[idx])?;
            check_non_zero("strides", self.strides[idx])?;
        }

        let total_stride = self.total_stride();
        let [height, width] = self.input_resolution;
        if height == 0 || width == 0 || height % total_stride != 0 || width % total_stride != 0 {
            return Err(ConfigError::Resolution {
                resolution: self.input_resolution,
                stride: total_stride,
            });
        }

        let stem = ResNetStemConfig::new()
            .with_in_channels(self.in_channels)
            .with_stem_width(self.stem_width);

        let policy = self.block_policy();
        let mut in_planes = stem.stem_width();
        let mut resolution = stem.output_resolution(self.input_resolution);

        let mut stacks = Vec::with_capacity(num_stacks);
        for idx in 0..num_stacks {
            let stack = ResNetStackConfig::build(
                &policy,
                self.num_repeats[idx],
                in_planes,
                self.filters_per_stack[idx],
                self.strides[idx],
                Some(resolution),
                self.stack_self_attn(idx),
            );
            stack.try_validate()?;

            in_planes = stack.out_planes();
            resolution = stack.output_resolution(resolution);
            stacks.push(stack);
        }

        self.normalization.try_validate_features(in_planes)?;
        let head_norm_act = NormActConfig::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone())
            .with_num_features(in_planes);

        tracing::debug!(
            block = ?self.block,
            num_stacks,
            feature_planes = in_planes,
            feature_resolution = ?resolution,
            "lowered ResNet config"
        );

        Ok(ResNetConfig::new(stem, stacks, head_norm_act, self.num_classes))
    }

    /// Lower to a [`ResNetConfig`].
    ///
    /// # Panics
    ///
    /// If the config is invalid; see [`ResNetAbstractConfig::try_to_structure`].
    pub fn to_structure(&self) -> ResNetConfig {
        match self.try_to_structure() {
            Ok(config) => config,
            Err(err) => panic!("{err}\n{self:#?}"),
        }
    }
}

impl From<ResNetAbstractConfig> for ResNetConfig {
    fn from(config: ResNetAbstractConfig) -> Self {
        config.to_structure()
    }
}

/// [`ResNet`] Structure Config.
///
/// This config defines the structure of a lowered [`ResNet`] model.
/// Stack validity is checked on `init`.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// The input stem.
    pub stem: ResNetStemConfig,

    /// The residual stacks.
    pub stacks: Vec<ResNetStackConfig>,

    /// The pre-head norm/act.
    pub head_norm_act: NormActConfig,

    /// The number of classes.
    pub num_classes: usize,
}

impl ResNetMeta for ResNetConfig {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn feature_planes(&self) -> usize {
        self.stacks
            .last()
            .map_or(self.stem.stem_width(), |stack| stack.out_planes())
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn stride(&self) -> usize {
        self.stacks
            .iter()
            .fold(self.stem.stride(), |acc, stack| acc * stack.stride())
    }
}

impl ResNetConfig {
    /// Initialize a [`ResNet`] model.
    ///
    /// # Panics
    ///
    /// If a stack is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let feature_planes = self.feature_planes();

        tracing::debug!(
            num_stacks = self.stacks.len(),
            num_blocks = self.stacks.iter().map(|s| s.len()).sum::<usize>(),
            feature_planes,
            num_classes = self.num_classes,
            "initializing ResNet"
        );

        ResNet {
            stem: self.stem.init(device),
            stacks: self.stacks.iter().map(|stack| stack.init(device)).collect(),
            head_norm_act: self
                .head_norm_act
                .clone()
                .with_num_features(feature_planes)
                .init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(feature_planes, self.num_classes).init(device),
        }
    }
}

/// Pre-activation `ResNet` model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input stem.
    pub stem: ResNetStem<B>,

    /// Residual stacks.
    pub stacks: Vec<ResNetStack<B>>,

    /// Pre-head norm/act.
    pub head_norm_act: NormAct<B>,

    /// Head pooling.
    pub pool: AdaptiveAvgPool2d,

    /// Head classifier.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNetMeta for ResNet<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn feature_planes(&self) -> usize {
        self.head_norm_act.num_features()
    }

    fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    fn stride(&self) -> usize {
        self.stacks
            .iter()
            .fold(self.stem.stride(), |acc, stack| acc * stack.stride())
    }
}

impl<B: Backend> ResNet<B> {
    /// Feature extraction; stem, stacks, and the final norm/act.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, feature_planes, out_height, out_width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward_features(
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

        let x = self.stem.forward(input);
        let x = self.stacks.iter().fold(x, |x, stack| stack.forward(x));
        let x = self.head_norm_act.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "feature_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("feature_planes", self.feature_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }

    /// Classifier logits.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]``
    pub fn forward_logits(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);
        let x = self.pool.forward(x);
        // [B, C, 1, 1] -> [B, C]
        let x = x.flatten(1, 3);
        self.fc.forward(x)
    }

    /// Class probabilities.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]``, each row summing to 1.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        softmax(self.forward_logits(input), 1)
    }

    /// Re-initialize the classifier with the specified number of output classes.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        let [d_input, _d_output] = self.fc.weight.dims();
        self.fc = LinearConfig::new(d_input, num_classes).init(&self.fc.weight.device());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::attn_bottleneck::AttnBottleneckBlockMeta;
    use crate::models::resnet::residual_block::{ResidualBlockConfig, ResidualBlockMeta};
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, TensorData};
    use hamcrest::prelude::*;

    fn tiny(block: BlockKind) -> ResNetAbstractConfig {
        ResNetAbstractConfig::new(block, vec![1, 2])
            .with_filters_per_stack(vec![8, 16])
            .with_strides(vec![2, 1])
            .with_expansion(Some(2))
            .with_stem_width(8)
            .with_input_resolution([32, 32])
            .with_num_classes(5)
    }

    #[test]
    fn test_named_configs() {
        let config = ResNetAbstractConfig::resnet18(10);
        assert_eq!(config.block, BlockKind::Basic);
        assert_eq!(config.num_repeats, vec![2, 2, 2, 2]);
        assert_eq!(config.filters_per_stack, vec![64, 128, 256, 512]);
        assert_eq!(config.strides, vec![2, 2, 2, 1]);
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.total_stride(), 32);

        assert_eq!(ResNetAbstractConfig::resnet34(10).num_repeats, vec![3, 4, 6, 3]);
        assert_eq!(
            ResNetAbstractConfig::resnet101(10).num_repeats,
            vec![3, 4, 23, 3]
        );

        let config = ResNetAbstractConfig::resnext50_32x4d(10);
        assert_eq!(config.block, BlockKind::Bottleneck);
        assert_eq!(config.cardinality, 32);
        assert_eq!(config.base_width, 4);

        let config = ResNetAbstractConfig::se_resnet50(10);
        assert_eq!(config.block, BlockKind::AttnBottleneck);
        assert_eq!(config.squeeze_reduction(), 16);
        assert!(!(0..4).any(|idx| config.stack_self_attn(idx)));

        let config = ResNetAbstractConfig::aa_resnet50(10);
        let flags: Vec<bool> = (0..4).map(|idx| config.stack_self_attn(idx)).collect();
        assert_eq!(flags, vec![false, false, true, true]);
    }

    #[test]
    fn test_expansion_defaults_to_block_kind() {
        assert_eq!(ResNetAbstractConfig::resnet18(10).expansion_factor(), 1);
        assert_eq!(ResNetAbstractConfig::resnet50(10).expansion_factor(), 4);
        assert_eq!(ResNetAbstractConfig::se_resnet50(10).expansion_factor(), 4);
        assert_eq!(
            ResNetAbstractConfig::resnet50(10)
                .with_expansion(Some(2))
                .expansion_factor(),
            2
        );

        let policy = ResNetAbstractConfig::resnet18(10).block_policy();
        assert_eq!(policy.expansion, 1);
        assert_eq!(policy.out_planes(64), 64);

        let config = ResNetAbstractConfig::resnet50(10)
            .with_expansion(Some(2))
            .to_structure();
        assert_eq!(config.feature_planes(), 1024);
    }

    #[test]
    fn test_resnet18_structure() {
        let config = ResNetAbstractConfig::resnet18(1000).to_structure();
        assert_eq!(config.stacks.len(), 4);
        assert_eq!(config.feature_planes(), 512);
        assert_eq!(config.stride(), 32);
        assert_eq!(config.feature_resolution([224, 224]), [7, 7]);
        assert_eq!(config.head_norm_act.num_features(), 512);

        let first = &config.stacks[0];
        assert_eq!(first.in_planes(), 64);
        assert_eq!(first.out_planes(), 64);
        assert_eq!(first.stride(), 2);
    }

    #[test]
    fn test_resnet50_structure() {
        let config = ResNetAbstractConfig::resnet50(1000).to_structure();
        assert_eq!(config.feature_planes(), 2048);

        let blocks: usize = config.stacks.iter().map(|s| s.len()).sum();
        assert_eq!(blocks, 16);

        let planes: Vec<(usize, usize)> = config
            .stacks
            .iter()
            .map(|s| (s.in_planes(), s.out_planes()))
            .collect();
        assert_eq!(
            planes,
            vec![(64, 256), (256, 512), (512, 1024), (1024, 2048)]
        );
    }

    #[test]
    fn test_resnext_structure() {
        let config = ResNetAbstractConfig::resnext50_32x4d(1000).to_structure();
        match &config.stacks[0].blocks[0] {
            ResidualBlockConfig::Bottleneck(block) => {
                use crate::models::resnet::bottleneck::BottleneckBlockMeta;
                assert_eq!(block.cardinality(), 32);
                assert_eq!(block.width(), 128);
                assert_eq!(block.out_planes(), 256);
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_aa_resnet50_structure() {
        let config = ResNetAbstractConfig::aa_resnet50(1000).to_structure();
        assert_eq!(config.feature_planes(), 2048);

        // Stack inputs are 56, 28, 14, 7.
        let expected = [
            (false, Some([56, 56])),
            (false, Some([28, 28])),
            (true, Some([14, 14])),
            (true, Some([7, 7])),
        ];
        for (stack, (self_attn, resolution)) in config.stacks.iter().zip(expected) {
            for block in &stack.blocks {
                match block {
                    ResidualBlockConfig::AttnBottleneck(block) => {
                        assert_eq!(block.self_attn, self_attn);
                        assert_eq!(block.resolution, resolution);
                    }
                    other => panic!("unexpected block: {other:?}"),
                }
            }
        }

        // The strided block of stack 3 attends at 7x7.
        match config.stacks[2].blocks.last() {
            Some(ResidualBlockConfig::AttnBottleneck(block)) => {
                assert_eq!(block.stride(), 2);
                assert_eq!(block.attention_resolution(), Ok(Some([7, 7])));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_structure_errors() {
        let config = ResNetAbstractConfig::resnet18(10).with_strides(vec![2, 2, 2]);
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::StackLengthMismatch {
                field: "strides",
                expected: 4,
                actual: 3
            }
        );

        let config = ResNetAbstractConfig::aa_resnet50(10).with_self_attn(Some(vec![true]));
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::StackLengthMismatch {
                field: "self_attn",
                expected: 4,
                actual: 1
            }
        );

        let config = ResNetAbstractConfig::resnet18(10).with_input_resolution([100, 100]);
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::Resolution {
                resolution: [100, 100],
                stride: 32
            }
        );

        let config = ResNetAbstractConfig::new(BlockKind::Basic, vec![2, 0, 2, 2]);
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::Zero {
                field: "num_repeats"
            }
        );

        let config = ResNetAbstractConfig::new(BlockKind::Basic, vec![]);
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::EmptyStack
        );

        // 128 key channels are not divisible by 7 heads.
        let config = ResNetAbstractConfig::aa_resnet50(10)
            .with_attention(AttentionPolicyConfig::new().with_num_heads(7));
        assert_that!(config.try_to_structure().is_err(), is(equal_to(true)));
    }

    #[test]
    fn test_group_norm_validation() {
        let config =
            ResNetAbstractConfig::resnet18(10).with_normalization(NormalizationConfig::group(3));
        assert_eq!(
            config.try_to_structure().unwrap_err(),
            ConfigError::Indivisible {
                field: "num_channels",
                value: 64,
                divisor: 3
            }
        );

        let config = ResNetAbstractConfig::resnet18(10)
            .with_normalization(NormalizationConfig::group(32))
            .to_structure();
        assert_eq!(config.head_norm_act.num_features(), 512);

        let device = Default::default();
        let model: ResNet<NdArray> = tiny(BlockKind::Basic)
            .with_normalization(NormalizationConfig::group(4))
            .to_structure()
            .init(&device);
        let input = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.forward_logits(input).dims(), [2, 5]);
    }

    #[test]
    #[should_panic(expected = "is not divisible by the total stride")]
    fn test_to_structure_panic() {
        ResNetAbstractConfig::resnet18(10)
            .with_input_resolution([100, 100])
            .to_structure();
    }

    #[test]
    fn test_tiny_basic_resnet() {
        type B = NdArray;
        let device = Default::default();

        let config = tiny(BlockKind::Basic).to_structure();
        let model: ResNet<B> = config.init(&device);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.feature_planes(), 16);
        assert_eq!(model.num_classes(), 5);
        assert_eq!(model.stride(), 8);

        let input = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);

        let features = model.forward_features(input.clone());
        assert_shape_contract!(
            ["batch", "feature_planes", "height", "width"],
            &features,
            &[
                ("batch", 2),
                ("feature_planes", 16),
                ("height", 4),
                ("width", 4)
            ],
        );

        let probs = model.forward(input);
        assert_eq!(probs.dims(), [2, 5]);
        probs.sum_dim(1).to_data().assert_approx_eq::<f32>(
            &TensorData::from([[1.0f32], [1.0]]),
            Default::default(),
        );
    }

    #[test]
    fn test_tiny_bottleneck_resnet_autodiff() {
        type B = Autodiff<NdArray>;
        let device = Default::default();

        let model: ResNet<B> = tiny(BlockKind::Bottleneck)
            .with_drop_rate(0.1)
            .to_structure()
            .init(&device);
        assert_eq!(model.feature_planes(), 32);

        let input = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        let logits = model.forward_logits(input);
        assert_eq!(logits.dims(), [2, 5]);

        let grads = logits.sum().backward();
        let stem_grad = model.stem.conv.conv.weight.grad(&grads);
        assert!(stem_grad.is_some());
    }

    #[test]
    fn test_tiny_attention_resnet() {
        type B = NdArray;
        let device = Default::default();

        let model: ResNet<B> = tiny(BlockKind::AttnBottleneck)
            .with_self_attn(Some(vec![false, true]))
            .with_attention(AttentionPolicyConfig::new().with_num_heads(2))
            .to_structure()
            .init(&device);

        let in_planes: Vec<usize> = model
            .stacks
            .iter()
            .flat_map(|stack| stack.blocks.iter())
            .inspect(|block| assert_eq!(block.kind(), BlockKind::AttnBottleneck))
            .map(|block| block.in_planes())
            .collect();
        assert_eq!(in_planes, vec![8, 16, 32]);

        let input = Tensor::random([1, 3, 32, 32], Distribution::Default, &device);
        let probs = model.forward(input);
        assert_eq!(probs.dims(), [1, 5]);
    }

    #[test]
    fn test_with_classes() {
        type B = NdArray;
        let device = Default::default();

        let model: ResNet<B> = tiny(BlockKind::Basic).to_structure().init(&device);
        let model = model.with_classes(3);
        assert_eq!(model.num_classes(), 3);

        let input = Tensor::random([1, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.forward_logits(input).dims(), [1, 3]);
    }

    #[test]
    fn test_config_round_trip_json() {
        let config = ResNetAbstractConfig::aa_resnet50(10);
        let json = config.to_string();
        let loaded = ResNetAbstractConfig::load_binary(json.as_bytes()).unwrap();
        assert_eq!(loaded.self_attn, config.self_attn);
        assert_eq!(loaded.block, BlockKind::AttnBottleneck);
    }
}
