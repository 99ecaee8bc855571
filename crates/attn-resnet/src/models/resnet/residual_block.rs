//! # Residual Block Wrapper

use crate::errors::ConfigError;
use crate::models::resnet::attn_bottleneck::{
    AttnBottleneckBlock, AttnBottleneckBlockConfig, AttnBottleneckBlockMeta,
};
use crate::models::resnet::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use crate::models::resnet::bottleneck::{
    BottleneckBlock, BottleneckBlockConfig, BottleneckBlockMeta,
};
use crate::models::resnet::util::stride_div_output_resolution;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use serde::{Deserialize, Serialize};

/// The residual block family of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Two 3x3 convs; see [`BasicBlock`].
    Basic,

    /// 1x1 / 3x3 / 1x1 convs; see [`BottleneckBlock`].
    Bottleneck,

    /// Bottleneck with squeeze gating or self-attention;
    /// see [`AttnBottleneckBlock`].
    AttnBottleneck,
}

impl BlockKind {
    /// The natural expansion factor of the family.
    pub fn default_expansion(&self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck | Self::AttnBottleneck => 4,
        }
    }
}

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of the block.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
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

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A [`BasicBlock`].
    Basic(BasicBlockConfig),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),

    /// An [`AttnBottleneckBlock`].
    AttnBottleneck(AttnBottleneckBlockConfig),
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
            Self::AttnBottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
            Self::AttnBottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
            Self::AttnBottleneck(config) => config.stride(),
        }
    }
}

impl From<BasicBlockConfig> for ResidualBlockConfig {
    fn from(config: BasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl From<AttnBottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: AttnBottleneckBlockConfig) -> Self {
        Self::AttnBottleneck(config)
    }
}

impl ResidualBlockConfig {
    /// The block family.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
            Self::AttnBottleneck(_) => BlockKind::AttnBottleneck,
        }
    }

    /// Check if the wrapped config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Basic(config) => config.try_validate(),
            Self::Bottleneck(config) => config.try_validate(),
            Self::AttnBottleneck(config) => config.try_validate(),
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => config.init(device).into(),
            Self::Bottleneck(config) => config.init(device).into(),
            Self::AttnBottleneck(config) => config.init(device).into(),
        }
    }

    /// Set the dropout rate.
    pub fn with_drop_rate(
        self,
        drop_rate: f64,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_drop_rate(drop_rate).into(),
            Self::Bottleneck(config) => config.with_drop_rate(drop_rate).into(),
            Self::AttnBottleneck(config) => config.with_drop_rate(drop_rate).into(),
        }
    }
}

/// A [`BasicBlock`], [`BottleneckBlock`], or [`AttnBottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A [`BasicBlock`].
    Basic(BasicBlock<B>),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),

    /// An [`AttnBottleneckBlock`].
    AttnBottleneck(AttnBottleneckBlock<B>),
}

impl<B: Backend> From<BasicBlock<B>> for ResidualBlock<B> {
    fn from(block: BasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<BottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: BottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> From<AttnBottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: AttnBottleneckBlock<B>) -> Self {
        Self::AttnBottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
            Self::AttnBottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
            Self::AttnBottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
            Self::AttnBottleneck(block) => block.stride(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// The block family.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
            Self::AttnBottleneck(_) => BlockKind::AttnBottleneck,
        }
    }

    /// Apply the wrapped block to the input.
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
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
            Self::AttnBottleneck(block) => block.forward(input),
        }
    }
}
