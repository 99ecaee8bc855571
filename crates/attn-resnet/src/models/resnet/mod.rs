//! # `ResNet`
//!
//! Pre-activation `ResNet` / `ResNeXt` models, with squeeze-gated and
//! self-attention-augmented bottleneck variants.
//!
//! ## Example
//!
//! ```rust,no_run
//! use attn_resnet::models::resnet::{ResNet, ResNetAbstractConfig};
//! use burn::backend::NdArray;
//!
//! let device = Default::default();
//! let model: ResNet<NdArray> = ResNetAbstractConfig::aa_resnet50(10)
//!     .to_structure()
//!     .init(&device);
//! ```

pub mod attn_bottleneck;
pub mod basic_block;
pub mod bottleneck;
pub mod prefabs;
pub mod residual_block;
pub mod resnet_model;
pub mod shortcut;
pub mod stack;
pub mod stem;
pub mod util;

pub use prefabs::*;
pub use resnet_model::*;
