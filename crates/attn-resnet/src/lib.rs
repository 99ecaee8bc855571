#![warn(missing_docs)]
//!# attn-resnet - ResNet and Attention-Augmented ResNet for Burn
//!
//! ## Notable Components
//!
//! * [`errors`] - config validation errors.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::activation`] - activation layer abstraction wrapper.
//!   * [`layers::normalization`] - norm layer abstraction wrapper.
//!   * [`layers::norm_act`] - ``Norm + Act`` block.
//!   * [`layers::conv_norm`] - ``Conv2d + [Norm + Act]`` block.
//!   * [`layers::pool`] - TensorFlow-style ``SAME`` pooling.
//!   * [`layers::attention`] - 2d multi-head self-attention and squeeze gating.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - pre-activation `ResNet`, `ResNeXt`, and
//!     attention-augmented bottleneck variants.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod errors;
pub mod layers;
pub mod models;
