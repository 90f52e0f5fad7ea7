//! # EfficientNet family blocks.

pub mod fused_mbconv;
