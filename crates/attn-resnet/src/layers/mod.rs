//! Common low-level modules for adding layers and operations in Burn.
pub mod activation;
pub mod attention;
pub mod conv_norm;
pub mod norm_act;
pub mod normalization;
pub mod pool;
