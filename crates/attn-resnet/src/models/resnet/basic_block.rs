//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the pre-activation two-conv `ResNet` unit.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].
//!
//! [`BasicBlockConfig`] implements [`Config`], and provides
//! [`BasicBlockConfig::init`] to initialize a [`BasicBlock`].
//!
//! [`BasicBlock`] implements [`Module`], and provides
//! [`BasicBlock::forward`].

use crate::errors::{ConfigError, check_non_zero, check_probability};
use crate::layers::activation::ActivationConfig;
use crate::layers::conv_norm::{ConvNormAct, ConvNormActConfig, ConvNormActMeta};
use crate::layers::norm_act::{NormAct, NormActConfig};
use crate::layers::normalization::NormalizationConfig;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig};
use crate::models::resnet::util::{build_dropout, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Dropout;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The width of both convs.
    fn planes(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes``
    fn out_planes(&self) -> usize {
        self.planes()
    }

    /// The stride of the first conv.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: \
    ///   ``[in_height=out_height*stride, in_width=out_width*stride]``.
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

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The width of both convs, and the out channels.
    pub planes: usize,

    /// The stride of the first conv.
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

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// The shared norm/act config.
    pub fn norm_act(&self) -> NormActConfig {
        NormActConfig::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone())
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        check_non_zero("planes", self.planes)?;
        check_non_zero("stride", self.stride)?;
        check_probability("drop_rate", self.drop_rate)?;
        self.normalization.try_validate_features(self.in_planes)?;
        self.normalization.try_validate_features(self.planes)?;
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}\n{self:#?}");
        }
    }

    /// Initialize a [`BasicBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        self.expect_valid();

        let in_planes = self.in_planes();
        let planes = self.planes();
        let norm_act = self.norm_act();

        BasicBlock {
            norm_act: norm_act.clone().with_num_features(in_planes).init(device),
            shortcut: ShortcutConfig::new(in_planes, self.out_planes())
                .with_stride(self.stride)
                .init(device),
            conv1: ConvNormActConfig::same(in_planes, planes, 3, self.stride)
                .with_norm_act_or_bias(Some(norm_act))
                .init(device),
            conv2: ConvNormActConfig::same(planes, planes, 3, 1)
                .with_norm_act_or_bias(None)
                .init(device),
            dropout: build_dropout(self.drop_rate),
        }
    }
}

/// Pre-activation Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// Input pre-activation.
    pub norm_act: NormAct<B>,

    /// Residual shortcut.
    pub shortcut: Shortcut<B>,

    /// Strided 3x3 conv, with norm/act.
    pub conv1: ConvNormAct<B>,

    /// 3x3 conv, no norm.
    pub conv2: ConvNormAct<B>,

    /// Optional dropout.
    pub dropout: Option<Dropout>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
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

        let x = self.norm_act.forward(input.clone());
        let identity = self.shortcut.forward(input, x.clone());

        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);

        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        let x = identity + x;

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
