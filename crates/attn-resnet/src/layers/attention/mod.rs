//! # 2d Attention Layers
//!
//! * [`multi_head`] - multi-head self-attention over the spatial positions
//!   of a feature map, with learned relative position logits.
//! * [`squeeze`] - squeeze-and-excitation channel gating.
pub mod multi_head;
pub mod squeeze;
