#![warn(missing_docs)]
//!# convblocks - Convolution Building Blocks for Burn
//!
//! Reusable convolution block compositions for image-classification
//! models, expressed as `burn` modules.
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::activation`] - activation layer abstraction wrapper.
//!   * [`layers::attention::squeeze_excite`] - squeeze-and-excite channel gate.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm`` block.
//!   * [`layers::conv::group_conv`] - grouped convolution layer.
//!   * [`layers::drop::drop_path`] - drop path / stochastic depth.
//! * [`models`] - model-family blocks.
//!   * [`models::efficientnet`] - the fused MBConv block.
//!   * [`models::resnext`] - the grouped-convolution bottleneck and stage.

pub mod layers;
pub mod models;
pub mod utility;
