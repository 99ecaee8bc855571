//! # `ResNet` Stack
//!
//! A [`ResNetStack`] is a sequence of [`ResidualBlock`]s sharing a width.
//!
//! [`ResNetStackConfig::build`] lays out a stack of `repeat` blocks;
//! the first ``repeat - 1`` blocks run at stride 1, and the last block
//! carries the stack stride.

use crate::errors::ConfigError;
use crate::layers::activation::ActivationConfig;
use crate::layers::attention::squeeze::SQUEEZE_DEFAULT_REDUCTION;
use crate::layers::normalization::NormalizationConfig;
use crate::models::resnet::attn_bottleneck::{AttentionPolicyConfig, AttnBottleneckBlockConfig};
use crate::models::resnet::basic_block::BasicBlockConfig;
use crate::models::resnet::bottleneck::{
    BOTTLENECK_BASE_WIDTH, BOTTLENECK_EXPANSION, BottleneckBlockConfig,
};
use crate::models::resnet::residual_block::{
    BlockKind, ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::resnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// Block construction settings shared by every block of a model.
#[derive(Config, Debug)]
pub struct BlockPolicyConfig {
    /// The block family.
    pub kind: BlockKind,

    /// Bottleneck expansion factor; ignored by [`BlockKind::Basic`].
    #[config(default = "BOTTLENECK_EXPANSION")]
    pub expansion: usize,

    /// Bottleneck groups.
    #[config(default = 1)]
    pub cardinality: usize,

    /// Bottleneck per-group base width.
    #[config(default = "BOTTLENECK_BASE_WIDTH")]
    pub base_width: usize,

    /// Squeeze gating reduction ratio.
    #[config(default = "SQUEEZE_DEFAULT_REDUCTION")]
    pub squeeze_reduction: usize,

    /// Self-attention hyper-parameters.
    #[config(default = "AttentionPolicyConfig::new()")]
    pub attention: AttentionPolicyConfig,

    /// Per-block dropout rate.
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Optional activation config.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub activation: Option<ActivationConfig>,
}

impl BlockPolicyConfig {
    /// The output planes of a block with `filters` planes.
    pub fn out_planes(
        &self,
        filters: usize,
    ) -> usize {
        match self.kind {
            BlockKind::Basic => filters,
            BlockKind::Bottleneck | BlockKind::AttnBottleneck => filters * self.expansion,
        }
    }

    /// Build a single block config.
    ///
    /// # Arguments
    ///
    /// - `in_planes`: the block input planes.
    /// - `filters`: the block planes.
    /// - `stride`: the block stride.
    /// - `resolution`: the block input resolution, if known.
    /// - `self_attn`: use self-attention; only meaningful for
    ///   [`BlockKind::AttnBottleneck`].
    pub fn block(
        &self,
        in_planes: usize,
        filters: usize,
        stride: usize,
        resolution: Option<[usize; 2]>,
        self_attn: bool,
    ) -> ResidualBlockConfig {
        match self.kind {
            BlockKind::Basic => BasicBlockConfig::new(in_planes, filters)
                .with_stride(stride)
                .with_drop_rate(self.drop_rate)
                .with_normalization(self.normalization.clone())
                .with_activation(self.activation.clone())
                .into(),
            BlockKind::Bottleneck => BottleneckBlockConfig::new(in_planes, filters)
                .with_stride(stride)
                .with_expansion_factor(self.expansion)
                .with_cardinality(self.cardinality)
                .with_base_width(self.base_width)
                .with_drop_rate(self.drop_rate)
                .with_normalization(self.normalization.clone())
                .with_activation(self.activation.clone())
                .into(),
            BlockKind::AttnBottleneck => AttnBottleneckBlockConfig::new(in_planes, filters)
                .with_stride(stride)
                .with_expansion_factor(self.expansion)
                .with_self_attn(self_attn)
                .with_attention(self.attention.clone())
                .with_squeeze_reduction(self.squeeze_reduction)
                .with_resolution(resolution)
                .with_drop_rate(self.drop_rate)
                .with_normalization(self.normalization.clone())
                .with_activation(self.activation.clone())
                .into(),
        }
    }
}

/// [`ResNetStack`] Meta API.
pub trait ResNetStackMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stack is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the stack.
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

/// [`ResNetStack`] Config.
#[derive(Config, Debug)]
pub struct ResNetStackConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for ResNetStackConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl ResNetStackMeta for ResNetStackConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |block| block.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |block| block.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl ResNetStackConfig {
    /// Build a stack config.
    ///
    /// The first ``repeat - 1`` blocks run at stride 1;
    /// the last block carries `stride`.
    ///
    /// # Arguments
    ///
    /// - `policy`: the shared block policy.
    /// - `repeat`: the number of blocks.
    /// - `in_planes`: the stack input planes.
    /// - `filters`: the planes of every block.
    /// - `stride`: the stack stride.
    /// - `resolution`: the stack input resolution, if known.
    /// - `self_attn`: use self-attention in every block.
    pub fn build(
        policy: &BlockPolicyConfig,
        repeat: usize,
        in_planes: usize,
        filters: usize,
        stride: usize,
        resolution: Option<[usize; 2]>,
        self_attn: bool,
    ) -> Self {
        let out_planes = policy.out_planes(filters);
        let blocks = (0..repeat)
            .map(|idx| {
                let block_in = if idx == 0 { in_planes } else { out_planes };
                let block_stride = if idx + 1 == repeat { stride } else { 1 };
                policy.block(block_in, filters, block_stride, resolution, self_attn)
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::EmptyStack);
        }

        for block in &self.blocks {
            block.try_validate()?;
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(ConfigError::PlaneMismatch {
                    prev: idx - 1,
                    out_planes: prev.out_planes(),
                    next: idx,
                    in_planes: curr.in_planes(),
                });
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}\n{self:#?}");
        }
    }

    /// Initialize a new [`ResNetStack`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStack<B> {
        self.expect_valid();

        ResNetStack {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, ResidualBlockConfig) -> ResidualBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }

    /// Update the dropout rate of every block.
    pub fn with_drop_rate(
        self,
        drop_rate: f64,
    ) -> Self {
        self.map_blocks(&mut |_, block| block.with_drop_rate(drop_rate))
    }
}

/// A `ResNet` stack of residual blocks.
#[derive(Module, Debug)]
pub struct ResNetStack<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResNetStackMeta for ResNetStack<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |block| block.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |block| block.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> ResNetStack<B> {
    /// Apply the stack.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
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
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    #[test]
    fn test_policy_out_planes() {
        assert_eq!(BlockPolicyConfig::new(BlockKind::Basic).out_planes(64), 64);
        assert_eq!(
            BlockPolicyConfig::new(BlockKind::Bottleneck).out_planes(64),
            256
        );
        assert_eq!(
            BlockPolicyConfig::new(BlockKind::AttnBottleneck)
                .with_expansion(2)
                .out_planes(64),
            128
        );
    }

    #[test]
    fn test_stack_build_last_block_strided() {
        let policy = BlockPolicyConfig::new(BlockKind::Basic);
        let config = ResNetStackConfig::build(&policy, 3, 16, 32, 2, None, false);
        config.expect_valid();

        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([12, 24]), [6, 12]);

        let strides: Vec<usize> = config.blocks.iter().map(|b| b.stride()).collect();
        assert_eq!(strides, vec![1, 1, 2]);

        let in_planes: Vec<usize> = config.blocks.iter().map(|b| b.in_planes()).collect();
        assert_eq!(in_planes, vec![16, 32, 32]);
    }

    #[test]
    fn test_stack_build_attention_resolution() {
        let policy = BlockPolicyConfig::new(BlockKind::AttnBottleneck);
        let config = ResNetStackConfig::build(&policy, 2, 256, 64, 2, Some([16, 16]), true);
        config.expect_valid();

        for block in &config.blocks {
            match block {
                ResidualBlockConfig::AttnBottleneck(block) => {
                    assert!(block.self_attn);
                    assert_eq!(block.resolution, Some([16, 16]));
                }
                other => panic!("unexpected block: {other:?}"),
            }
        }
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    fn test_stack_validation() {
        let empty = ResNetStackConfig::new(vec![]);
        assert_eq!(empty.try_validate(), Err(ConfigError::EmptyStack));
        assert_that!(empty.in_planes(), is(equal_to(0)));

        let broken = ResNetStackConfig::from(vec![
            BasicBlockConfig::new(8, 16).into(),
            BasicBlockConfig::new(8, 16).into(),
        ]);
        assert_eq!(
            broken.try_validate(),
            Err(ConfigError::PlaneMismatch {
                prev: 0,
                out_planes: 16,
                next: 1,
                in_planes: 8
            })
        );
    }

    #[test]
    #[should_panic(expected = "stack has no blocks")]
    fn test_stack_init_empty() {
        let device = Default::default();
        let _stack: ResNetStack<NdArray> = ResNetStackConfig::new(vec![]).init(&device);
    }

    #[test]
    fn test_stack_with_drop_rate() {
        let policy = BlockPolicyConfig::new(BlockKind::Bottleneck);
        let config = ResNetStackConfig::build(&policy, 2, 8, 2, 1, None, false).with_drop_rate(0.25);
        for block in &config.blocks {
            match block {
                ResidualBlockConfig::Bottleneck(block) => assert_eq!(block.drop_rate, 0.25),
                other => panic!("unexpected block: {other:?}"),
            }
        }
    }

    #[test]
    fn test_stack_forward() {
        type B = NdArray;
        let device = Default::default();

        let config = ResNetStackConfig::from(vec![
            BasicBlockConfig::new(4, 8).into(),
            BasicBlockConfig::new(8, 8).with_stride(2).into(),
        ]);
        let stack: ResNetStack<B> = config.init(&device);

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.in_planes(), 4);
        assert_eq!(stack.out_planes(), 8);
        assert_eq!(stack.stride(), 2);

        let input = Tensor::ones([2, 4, 12, 24], &device);
        let output = stack.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 8),
                ("out_height", 6),
                ("out_width", 12)
            ],
        );

        let mut expected = input;
        for block in stack.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
