//! # Residual Shortcut
//!
//! The shortcut path of a residual block must agree with the main path
//! in channel count and spatial extent before the addition:
//!
//! * [`ShortcutKind::Projection`] - a strided 1x1 conv of the pre-activated
//!   input, when the channel counts differ;
//! * [`ShortcutKind::Pool`] - max pooling of the raw input, when only the
//!   resolution changes;
//! * [`ShortcutKind::Identity`] - the raw input.

use crate::layers::conv_norm::{ConvNormAct, ConvNormActConfig, ConvNormActMeta};
use crate::models::resnet::util::stride_div_output_resolution;
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Shortcut reconciliation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortcutKind {
    /// 1x1 projection conv.
    Projection,

    /// Max pooling downsample.
    Pool,

    /// Pass-through.
    Identity,
}

impl ShortcutKind {
    /// Select the shortcut kind for a block.
    pub fn select(
        in_planes: usize,
        out_planes: usize,
        stride: usize,
    ) -> Self {
        if in_planes != out_planes {
            Self::Projection
        } else if stride > 1 {
            Self::Pool
        } else {
            Self::Identity
        }
    }
}

/// [`Shortcut`] Meta.
pub trait ShortcutMeta {
    /// The shortcut strategy.
    fn kind(&self) -> ShortcutKind;

    /// The stride of the shortcut.
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

/// [`Shortcut`] Config.
#[derive(Config, Debug)]
pub struct ShortcutConfig {
    /// Input planes.
    pub in_planes: usize,

    /// Output planes.
    pub out_planes: usize,

    /// The stride of the block.
    #[config(default = 1)]
    pub stride: usize,
}

impl ShortcutMeta for ShortcutConfig {
    fn kind(&self) -> ShortcutKind {
        ShortcutKind::select(self.in_planes, self.out_planes, self.stride)
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ShortcutConfig {
    /// Initialize a [`Shortcut`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Shortcut<B> {
        let (projection, pool) = match self.kind() {
            ShortcutKind::Projection => (
                Some(
                    ConvNormActConfig::same(self.in_planes, self.out_planes, 1, self.stride)
                        .with_norm_act_or_bias(None)
                        .init(device),
                ),
                None,
            ),
            ShortcutKind::Pool => (
                None,
                Some(
                    MaxPool2dConfig::new([self.stride, self.stride])
                        .with_strides([self.stride, self.stride])
                        .init(),
                ),
            ),
            ShortcutKind::Identity => (None, None),
        };
        Shortcut {
            projection,
            pool,
            stride: self.stride,
        }
    }
}

/// Residual shortcut path.
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    /// Optional projection conv.
    pub projection: Option<ConvNormAct<B>>,

    /// Optional downsample pool.
    pub pool: Option<MaxPool2d>,

    /// The stride of the block.
    pub stride: usize,
}

impl<B: Backend> ShortcutMeta for Shortcut<B> {
    fn kind(&self) -> ShortcutKind {
        match (&self.projection, &self.pool) {
            (Some(_), _) => ShortcutKind::Projection,
            (None, Some(_)) => ShortcutKind::Pool,
            (None, None) => ShortcutKind::Identity,
        }
    }

    fn stride(&self) -> usize {
        match &self.projection {
            Some(conv) => conv.stride()[0],
            None => self.stride,
        }
    }
}

impl<B: Backend> Shortcut<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: the raw block input,
    ///   ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    /// - `pre_activated`: the block's pre-activated input, same shape.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        pre_activated: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match (&self.projection, &self.pool) {
            (Some(projection), _) => projection.forward(pre_activated),
            (None, Some(pool)) => pool.forward(input),
            (None, None) => input,
        }
    }
}
