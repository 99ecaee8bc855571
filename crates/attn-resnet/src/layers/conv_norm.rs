//! # `ConvNormAct` - conv with optional norm/activation.
//!
//! A [`ConvNormAct`] module is:
//! * a [`Conv2d`] layer,
//! * an optional [`NormAct`] layer.
//!
//! Strided "same" convs pad TensorFlow-style at forward time, placing the
//! odd padding cell on the bottom/right; see [`pad_same`].

use crate::layers::norm_act::{NormAct, NormActConfig};
use crate::layers::pool::pad_same;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// Symmetric padding which preserves the input extent for odd kernels.
///
/// # Panics
///
/// If `kernel_size` is even.
pub fn same_conv_padding(
    kernel_size: usize,
    dilation: usize,
) -> PaddingConfig2d {
    assert!(
        kernel_size % 2 == 1,
        "same padding requires an odd kernel: {kernel_size}"
    );
    let pad = dilation * (kernel_size - 1) / 2;
    PaddingConfig2d::Explicit(pad, pad)
}

/// [`ConvNormAct`] Meta.
pub trait ConvNormActMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Is there a norm/act stage?
    fn has_norm_act(&self) -> bool;
}

/// [`ConvNormAct`] Config.
///
/// Implements [`ConvNormActMeta`].
#[derive(Config, Debug)]
pub struct ConvNormActConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The optional [`NormAct`] config.
    ///
    /// The feature size will be auto-matched.
    #[config(default = "Some(NormActConfig::new())")]
    pub norm_act: Option<NormActConfig>,

    /// Pad the input with [`pad_same`] before a ``Valid`` conv.
    #[config(default = false)]
    pub dynamic_pad: bool,
}

impl From<Conv2dConfig> for ConvNormActConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvNormActMeta for ConvNormActConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn has_norm_act(&self) -> bool {
        self.norm_act.is_some()
    }
}

impl ConvNormActConfig {
    /// A square conv with TensorFlow "same" padding.
    ///
    /// The output extent is ``input / stride``.
    /// Unstrided convs pad symmetrically; strided convs pad at forward time,
    /// e.g. ``(0, 1)`` for a 3x3/2 conv and ``(2, 3)`` for a 7x7/2 conv.
    ///
    /// The conv carries a bias only when no norm follows;
    /// see [`ConvNormActConfig::with_norm_act_or_bias`].
    pub fn same(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
    ) -> Self {
        let dynamic_pad = stride > 1;
        let padding = if dynamic_pad {
            PaddingConfig2d::Valid
        } else {
            same_conv_padding(kernel_size, 1)
        };
        Self::new(
            Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(padding)
                .with_bias(false),
        )
        .with_dynamic_pad(dynamic_pad)
    }

    /// Set the conv groups.
    pub fn with_groups(
        self,
        groups: usize,
    ) -> Self {
        Self {
            conv: self.conv.with_groups(groups),
            ..self
        }
    }

    /// Set (or clear) the norm/act stage.
    ///
    /// Convs without a norm stage get a bias term.
    pub fn with_norm_act_or_bias(
        self,
        norm_act: Option<NormActConfig>,
    ) -> Self {
        let bias = norm_act.is_none();
        Self {
            conv: self.conv.with_bias(bias),
            norm_act,
            ..self
        }
    }

    /// Initialize a [`ConvNormAct`].
    ///
    /// Auto-matches the norm layer input channels
    /// to the conv layer's output channels.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNormAct<B> {
        let features = self.out_channels();
        ConvNormAct {
            conv: self.conv.init(device),
            norm_act: self
                .norm_act
                .as_ref()
                .map(|cfg| cfg.clone().with_num_features(features).init(device)),
            dynamic_pad: self.dynamic_pad,
        }
    }
}

/// [`Conv2d`] layer with optional [`NormAct`].
///
/// Implements [`ConvNormActMeta`].
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Optional Norm/Act layer.
    pub norm_act: Option<NormAct<B>>,

    /// Apply [`pad_same`] before the conv.
    pub dynamic_pad: bool,
}

impl<B: Backend> ConvNormActMeta for ConvNormAct<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn has_norm_act(&self) -> bool {
        self.norm_act.is_some()
    }
}

impl<B: Backend> ConvNormAct<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = if self.dynamic_pad {
            pad_same(
                input,
                self.conv.kernel_size,
                self.conv.stride,
                self.conv.dilation,
                0.0,
            )
        } else {
            input
        };
        let x = self.conv.forward(x);

        let x = match &self.norm_act {
            Some(norm_act) => norm_act.forward(x),
            None => x,
        };

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
