//! # Multi-Head 2d Self-Attention
//!
//! [`MultiHeadAttention2d`] attends over all spatial positions of a feature map.
//!
//! A 1x1 conv projects the input to ``[q; k; v]`` with ``key_dim``,
//! ``key_dim``, and ``value_dim`` channels; each is split into ``num_heads``
//! heads. With positional embeddings enabled, learned relative position
//! logits (one table for each spatial axis) are added to the content logits:
//!
//! ```text
//! logits[i, j] = q_i . k_j + q_i . E_w[col(j) - col(i)] + q_i . E_h[row(j) - row(i)]
//! ```
//!
//! The heads are merged and passed through a 1x1 output projection.
//!
//! [`MultiHeadAttention2dConfig`] implements [`Config`], and provides
//! [`MultiHeadAttention2dConfig::init`] to initialize a [`MultiHeadAttention2d`].

use crate::errors::{ConfigError, check_divisible, check_non_zero};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::softmax;

/// [`MultiHeadAttention2d`] Meta.
pub trait MultiHeadAttention2dMeta {
    /// The number of input channels.
    fn channels(&self) -> usize;

    /// The total key/query depth, ``dk``.
    fn key_dim(&self) -> usize;

    /// The total value depth, ``dv``; also the output channels.
    fn value_dim(&self) -> usize;

    /// The number of heads.
    fn num_heads(&self) -> usize;

    /// The fixed ``[height, width]`` resolution, if positional.
    fn resolution(&self) -> Option<[usize; 2]>;

    /// The per-head key/query depth.
    fn key_head_dim(&self) -> usize {
        self.key_dim() / self.num_heads()
    }

    /// The per-head value depth.
    fn value_head_dim(&self) -> usize {
        self.value_dim() / self.num_heads()
    }
}

/// [`MultiHeadAttention2d`] Config.
///
/// Implements [`MultiHeadAttention2dMeta`].
#[derive(Config, Debug)]
pub struct MultiHeadAttention2dConfig {
    /// The number of input channels.
    pub channels: usize,

    /// The total key/query depth, ``dk``.
    pub key_dim: usize,

    /// The total value depth, ``dv``.
    pub value_dim: usize,

    /// The number of heads.
    #[config(default = 8)]
    pub num_heads: usize,

    /// Add learned relative position logits.
    #[config(default = true)]
    pub pos_emb: bool,

    /// The fixed ``[height, width]`` input resolution.
    ///
    /// Required when `pos_emb` is set.
    #[config(default = "None")]
    pub resolution: Option<[usize; 2]>,
}

impl MultiHeadAttention2dMeta for MultiHeadAttention2dConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn key_dim(&self) -> usize {
        self.key_dim
    }

    fn value_dim(&self) -> usize {
        self.value_dim
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn resolution(&self) -> Option<[usize; 2]> {
        if self.pos_emb { self.resolution } else { None }
    }
}

impl MultiHeadAttention2dConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        check_non_zero("channels", self.channels)?;
        check_non_zero("num_heads", self.num_heads)?;
        check_non_zero("key_dim", self.key_dim)?;
        check_non_zero("value_dim", self.value_dim)?;
        check_divisible("key_dim", self.key_dim, self.num_heads)?;
        check_divisible("value_dim", self.value_dim, self.num_heads)?;
        if self.pos_emb {
            match self.resolution {
                None => return Err(ConfigError::MissingResolution),
                Some([height, width]) => {
                    check_non_zero("height", height)?;
                    check_non_zero("width", width)?;
                }
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

    /// Initialize a [`MultiHeadAttention2d`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MultiHeadAttention2d<B> {
        self.expect_valid();

        let key_dim = self.key_dim();
        let value_dim = self.value_dim();

        let rel_init = Initializer::Normal {
            mean: 0.0,
            std: (self.key_head_dim() as f64).powf(-0.5),
        };
        let (rel_emb_h, rel_emb_w) = match self.resolution() {
            Some([height, width]) => (
                Some(rel_init.init([2 * height - 1, self.key_head_dim()], device)),
                Some(rel_init.init([2 * width - 1, self.key_head_dim()], device)),
            ),
            None => (None, None),
        };

        MultiHeadAttention2d {
            num_heads: self.num_heads,
            key_dim,
            qkv: Conv2dConfig::new([self.channels, 2 * key_dim + value_dim], [1, 1])
                .with_padding(PaddingConfig2d::Valid)
                .init(device),
            proj: Conv2dConfig::new([value_dim, value_dim], [1, 1])
                .with_padding(PaddingConfig2d::Valid)
                .init(device),
            rel_emb_h,
            rel_emb_w,
        }
    }
}

/// Multi-head 2d self-attention.
///
/// Implements [`MultiHeadAttention2dMeta`].
#[derive(Module, Debug)]
pub struct MultiHeadAttention2d<B: Backend> {
    /// The number of heads.
    pub num_heads: usize,

    /// The total key/query depth.
    pub key_dim: usize,

    /// ``[q; k; v]`` projection.
    pub qkv: Conv2d<B>,

    /// Output projection.
    pub proj: Conv2d<B>,

    /// Relative height embeddings, ``[2*height - 1, key_head_dim]``.
    pub rel_emb_h: Option<Param<Tensor<B, 2>>>,

    /// Relative width embeddings, ``[2*width - 1, key_head_dim]``.
    pub rel_emb_w: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> MultiHeadAttention2dMeta for MultiHeadAttention2d<B> {
    fn channels(&self) -> usize {
        self.qkv.weight.shape().dims[1]
    }

    fn key_dim(&self) -> usize {
        self.key_dim
    }

    fn value_dim(&self) -> usize {
        self.proj.weight.shape().dims[0]
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn resolution(&self) -> Option<[usize; 2]> {
        match (&self.rel_emb_h, &self.rel_emb_w) {
            (Some(h), Some(w)) => Some([
                (h.shape().dims[0] + 1) / 2,
                (w.shape().dims[0] + 1) / 2,
            ]),
            _ => None,
        }
    }
}

impl<B: Backend> MultiHeadAttention2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    /// - `prior_logits`: optional ``[batch, num_heads, height*width, height*width]``
    ///   logits from an earlier attention layer, added before the softmax.
    ///
    /// # Returns
    ///
    /// A tuple of:
    /// - ``[batch, value_dim, height, width]`` attention output,
    /// - ``[batch, num_heads, height*width, height*width]`` pre-softmax logits.
    ///
    /// # Panics
    ///
    /// If the input does not match the positional resolution.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        prior_logits: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", self.channels())],
        );
        if let Some(resolution) = self.resolution() {
            assert_eq!(
                [height, width],
                resolution,
                "input resolution does not match positional embeddings"
            );
        }

        let heads = self.num_heads();
        let key_dim = self.key_dim();
        let value_dim = self.value_dim();
        let key_head_dim = self.key_head_dim();
        let positions = height * width;

        let qkv = self.qkv.forward(input);
        let q = qkv
            .clone()
            .narrow(1, 0, key_dim)
            .reshape([batch, heads, key_head_dim, positions])
            .mul_scalar((key_head_dim as f64).powf(-0.5));
        let k = qkv
            .clone()
            .narrow(1, key_dim, key_dim)
            .reshape([batch, heads, key_head_dim, positions]);
        let v = qkv
            .narrow(1, 2 * key_dim, value_dim)
            .reshape([batch, heads, self.value_head_dim(), positions]);

        // [batch, heads, positions, positions]
        let mut logits = q.clone().swap_dims(2, 3).matmul(k);
        if let (Some(rel_h), Some(rel_w)) = (&self.rel_emb_h, &self.rel_emb_w) {
            logits = logits + relative_logits_2d(q, rel_h.val(), rel_w.val(), height, width);
        }
        if let Some(prior) = prior_logits {
            logits = logits + prior;
        }

        let weights = softmax(logits.clone(), 3);
        let x = weights
            .matmul(v.swap_dims(2, 3))
            .swap_dims(2, 3)
            .reshape([batch, value_dim, height, width]);
        let x = self.proj.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "value_dim", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("value_dim", value_dim),
                ("height", height),
                ("width", width)
            ]
        );

        (x, logits)
    }
}

/// Relative position index table.
///
/// ``index[i, j] = j - i + length - 1``, in ``[0, 2*length - 1)``.
fn relative_index<B: Backend>(
    length: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let pos = Tensor::<B, 1, Int>::arange(0..length as i64, device);
    let rows = pos.clone().reshape([length, 1]).expand([length, length]);
    let cols = pos.reshape([1, length]).expand([length, length]);
    (cols - rows).add_scalar(length as i64 - 1)
}

/// Relative logits along the last spatial axis.
///
/// # Arguments
///
/// - `q`: ``[batch, heads, outer, length, depth]`` queries.
/// - `emb`: ``[2*length - 1, depth]`` relative embeddings.
///
/// # Returns
///
/// ``[batch, heads, outer, length, length]``, where
/// ``out[.., i, j] = q[.., i, :] . emb[j - i + length - 1, :]``.
pub(crate) fn relative_logits_1d<B: Backend>(
    q: Tensor<B, 5>,
    emb: Tensor<B, 2>,
) -> Tensor<B, 5> {
    let [batch, heads, outer, length, depth] = q.dims();
    let device = q.device();

    let rel = q
        .reshape([batch * heads * outer * length, depth])
        .matmul(emb.transpose())
        .reshape([batch, heads, outer, length, 2 * length - 1]);

    let index = relative_index::<B>(length, &device)
        .reshape([1, 1, 1, length, length])
        .expand([batch, heads, outer, length, length]);

    rel.gather(4, index)
}

/// Relative logits over both spatial axes.
///
/// # Arguments
///
/// - `q`: ``[batch, heads, depth, height*width]`` queries.
/// - `rel_h`: ``[2*height - 1, depth]``.
/// - `rel_w`: ``[2*width - 1, depth]``.
///
/// # Returns
///
/// ``[batch, heads, height*width, height*width]``
fn relative_logits_2d<B: Backend>(
    q: Tensor<B, 4>,
    rel_h: Tensor<B, 2>,
    rel_w: Tensor<B, 2>,
    height: usize,
    width: usize,
) -> Tensor<B, 4> {
    let [batch, heads, depth, positions] = q.dims();

    // [batch, heads, height, width, depth]
    let q = q
        .reshape([batch, heads, depth, height, width])
        .permute([0, 1, 3, 4, 2]);

    // [batch, heads, height, width, width] -> [.., height, width, height, width]
    let logits_w = relative_logits_1d(q.clone(), rel_w)
        .unsqueeze_dim::<6>(4)
        .expand([batch, heads, height, width, height, width]);

    // [batch, heads, width, height, height] -> [.., height, width, height, width]
    let logits_h = relative_logits_1d(q.swap_dims(2, 3), rel_h)
        .unsqueeze_dim::<6>(5)
        .expand([batch, heads, width, height, height, width])
        .swap_dims(2, 3);

    (logits_w + logits_h).reshape([batch, heads, positions, positions])
}
