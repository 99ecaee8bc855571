//! # Attention Bottleneck Block
//!
//! An [`AttnBottleneckBlock`] is a bottleneck whose 3x3 stage is either:
//!
//! * a plain 3x3 conv, followed (after the expansion) by
//!   [`SqueezeAttention2d`] channel gating; or
//! * a 3x3 conv producing ``planes - dv`` channels, concatenated with
//!   ``dv`` channels of [`MultiHeadAttention2d`] output (attention-augmented
//!   convolution).
//!
//! Under a strided block, the attention branch is first reduced with a
//! ``SAME``-padded average pool of kernel ``2 * stride``.

use crate::errors::{ConfigError, check_divisible, check_non_zero, check_probability};
use crate::layers::activation::ActivationConfig;
use crate::layers::attention::multi_head::{
    MultiHeadAttention2d, MultiHeadAttention2dConfig, MultiHeadAttention2dMeta,
};
use crate::layers::attention::squeeze::{
    SQUEEZE_DEFAULT_REDUCTION, SqueezeAttention2d, SqueezeAttention2dConfig,
};
use crate::layers::conv_norm::{ConvNormAct, ConvNormActConfig, ConvNormActMeta};
use crate::layers::norm_act::{NormAct, NormActConfig};
use crate::layers::normalization::NormalizationConfig;
use crate::layers::pool::{AvgPool2dSame, AvgPool2dSameConfig};
use crate::models::resnet::bottleneck::BOTTLENECK_EXPANSION;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig};
use crate::models::resnet::util::{build_dropout, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Dropout;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Self-attention hyper-parameters shared by the blocks of a model.
#[derive(Config, Debug)]
pub struct AttentionPolicyConfig {
    /// The number of attention heads.
    #[config(default = 8)]
    pub num_heads: usize,

    /// Add learned relative position logits.
    #[config(default = true)]
    pub pos_emb: bool,

    /// Key depth as a fraction of the block planes.
    #[config(default = "0.5")]
    pub frac_dk: f64,

    /// Value depth as a fraction of the block planes.
    #[config(default = "0.25")]
    pub frac_dv: f64,
}

impl Default for AttentionPolicyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AttentionPolicyConfig {
    /// The key depth for a block of `planes`: ``floor(planes * frac_dk)``.
    pub fn key_dim(
        &self,
        planes: usize,
    ) -> usize {
        (planes as f64 * self.frac_dk).floor() as usize
    }

    /// The value depth for a block of `planes`: ``floor(planes * frac_dv)``.
    pub fn value_dim(
        &self,
        planes: usize,
    ) -> usize {
        (planes as f64 * self.frac_dv).floor() as usize
    }

    /// Check if the policy is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        check_non_zero("num_heads", self.num_heads)?;
        check_probability("frac_dk", self.frac_dk)?;
        check_probability("frac_dv", self.frac_dv)?;
        Ok(())
    }
}

/// [`AttnBottleneckBlock`] Meta trait.
pub trait AttnBottleneckBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The width of the inner stage.
    fn planes(&self) -> usize;

    /// Control factor for `out_planes()`.
    fn expansion_factor(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// Does the inner stage use multi-head self-attention?
    fn self_attn(&self) -> bool;

    /// The attention value depth; zero without self-attention.
    fn value_dim(&self) -> usize;

    /// The number of channels produced by the inner 3x3 conv.
    ///
    /// ``planes - value_dim`` with self-attention, else ``planes``.
    fn conv_planes(&self) -> usize {
        self.planes() - self.value_dim()
    }

    /// The block stride.
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

/// [`AttnBottleneckBlock`] Config.
///
/// Implements [`AttnBottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct AttnBottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The width of the inner stage.
    pub planes: usize,

    /// Control factor for `out_planes()`.
    #[config(default = "BOTTLENECK_EXPANSION")]
    pub expansion_factor: usize,

    /// The block stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Use multi-head self-attention rather than squeeze gating.
    #[config(default = false)]
    pub self_attn: bool,

    /// Self-attention hyper-parameters.
    #[config(default = "AttentionPolicyConfig::new()")]
    pub attention: AttentionPolicyConfig,

    /// The squeeze gating reduction ratio.
    #[config(default = "SQUEEZE_DEFAULT_REDUCTION")]
    pub squeeze_reduction: usize,

    /// The ``[height, width]`` block input resolution.
    ///
    /// Required for self-attention with positional embeddings.
    #[config(default = "None")]
    pub resolution: Option<[usize; 2]>,

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

impl AttnBottleneckBlockMeta for AttnBottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn self_attn(&self) -> bool {
        self.self_attn
    }

    fn value_dim(&self) -> usize {
        if self.self_attn {
            self.attention.value_dim(self.planes)
        } else {
            0
        }
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl AttnBottleneckBlockConfig {
    /// The shared norm/act config.
    pub fn norm_act(&self) -> NormActConfig {
        NormActConfig::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone())
    }

    /// The resolution seen by the attention layer.
    ///
    /// The block input resolution, reduced by the block stride.
    pub fn attention_resolution(&self) -> Result<Option<[usize; 2]>, ConfigError> {
        match self.resolution {
            None => Ok(None),
            Some([height, width]) => Ok(Some([
                check_divisible("height", height, self.stride)?,
                check_divisible("width", width, self.stride)?,
            ])),
        }
    }

    /// The [`MultiHeadAttention2dConfig`], when `self_attn` is set.
    pub fn attention_config(&self) -> Result<Option<MultiHeadAttention2dConfig>, ConfigError> {
        if !self.self_attn {
            return Ok(None);
        }
        let config = MultiHeadAttention2dConfig::new(
            self.planes,
            self.attention.key_dim(self.planes),
            self.value_dim(),
        )
        .with_num_heads(self.attention.num_heads)
        .with_pos_emb(self.attention.pos_emb)
        .with_resolution(self.attention_resolution()?);
        config.try_validate()?;
        Ok(Some(config))
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        check_non_zero("planes", self.planes)?;
        check_non_zero("expansion_factor", self.expansion_factor)?;
        check_non_zero("stride", self.stride)?;
        check_probability("drop_rate", self.drop_rate)?;
        self.normalization.try_validate_features(self.in_planes)?;
        self.normalization.try_validate_features(self.planes)?;
        if self.self_attn {
            self.attention.try_validate()?;
        }
        self.attention_config()?;
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}\n{self:#?}");
        }
    }

    /// Initialize an [`AttnBottleneckBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> AttnBottleneckBlock<B> {
        self.expect_valid();

        let in_planes = self.in_planes();
        let planes = self.planes();
        let out_planes = self.out_planes();
        let conv_planes = self.conv_planes();
        let stride = self.stride();
        let norm_act = self.norm_act();

        let attn = self
            .attention_config()
            .unwrap_or_else(|err| panic!("{err}"))
            .map(|config| config.init(device));

        let pool = if attn.is_some() && stride > 1 {
            Some(AvgPool2dSameConfig::new([2 * stride, 2 * stride], [stride, stride]).init())
        } else {
            None
        };

        let squeeze = if self.self_attn {
            None
        } else {
            Some(
                SqueezeAttention2dConfig::new(out_planes)
                    .with_reduction(self.squeeze_reduction)
                    .init(device),
            )
        };

        AttnBottleneckBlock {
            expansion_factor: self.expansion_factor,
            stride,

            norm_act: norm_act.clone().with_num_features(in_planes).init(device),
            shortcut: ShortcutConfig::new(in_planes, out_planes)
                .with_stride(stride)
                .init(device),

            contract: ConvNormActConfig::same(in_planes, planes, 1, 1)
                .with_norm_act_or_bias(Some(norm_act.clone()))
                .init(device),
            conv: if conv_planes > 0 {
                Some(
                    ConvNormActConfig::same(planes, conv_planes, 3, stride)
                        .with_norm_act_or_bias(None)
                        .init(device),
                )
            } else {
                None
            },
            pool,
            attn,

            mid_norm_act: norm_act.with_num_features(planes).init(device),
            expand: ConvNormActConfig::same(planes, out_planes, 1, 1)
                .with_norm_act_or_bias(None)
                .init(device),
            squeeze,

            dropout: build_dropout(self.drop_rate),
        }
    }
}

/// Pre-activation Attention Bottleneck Block.
///
/// Implements [`AttnBottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct AttnBottleneckBlock<B: Backend> {
    /// Expansion factor.
    pub expansion_factor: usize,

    /// The block stride.
    pub stride: usize,

    /// Input pre-activation.
    pub norm_act: NormAct<B>,

    /// Residual shortcut.
    pub shortcut: Shortcut<B>,

    /// 1x1 contraction, with norm/act.
    pub contract: ConvNormAct<B>,

    /// Strided 3x3 conv, no norm; absent when attention fills every channel.
    pub conv: Option<ConvNormAct<B>>,

    /// Attention-branch downsample.
    pub pool: Option<AvgPool2dSame>,

    /// Multi-head self-attention.
    pub attn: Option<MultiHeadAttention2d<B>>,

    /// Norm/act over the merged conv/attention channels.
    pub mid_norm_act: NormAct<B>,

    /// 1x1 expansion, no norm.
    pub expand: ConvNormAct<B>,

    /// Squeeze gating; present without self-attention.
    pub squeeze: Option<SqueezeAttention2d<B>>,

    /// Optional dropout.
    pub dropout: Option<Dropout>,
}

impl<B: Backend> AttnBottleneckBlockMeta for AttnBottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.contract.in_channels()
    }

    fn planes(&self) -> usize {
        self.contract.out_channels()
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn self_attn(&self) -> bool {
        self.attn.is_some()
    }

    fn value_dim(&self) -> usize {
        match &self.attn {
            Some(attn) => attn.value_dim(),
            None => 0,
        }
    }

    fn out_planes(&self) -> usize {
        self.expand.out_channels()
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl<B: Backend> AttnBottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*expansion_factor, out_height, out_width]`` tensor.
    ///
    /// # Panics
    ///
    /// If the attention layer has fixed positional embeddings,
    /// and the reduced input does not match them.
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
        let x_c = self.conv.as_ref().map(|conv| conv.forward(x.clone()));

        let x = match &self.attn {
            Some(attn) => {
                let x = match &self.pool {
                    Some(pool) => pool.forward(x),
                    None => x,
                };
                let (o, _logits) = attn.forward(x, None);
                match x_c {
                    Some(x_c) => Tensor::cat(vec![o, x_c], 1),
                    None => o,
                }
            }
            None => x_c.unwrap_or(x),
        };

        assert_shape_contract_periodically!(
            ["batch", "planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        let x = self.mid_norm_act.forward(x);
        let x = self.expand.forward(x);

        let x = match &self.squeeze {
            Some(squeeze) => squeeze.forward(x),
            None => x,
        };

        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        identity + x
    }
}
