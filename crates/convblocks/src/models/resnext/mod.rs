//! # ResNeXt family blocks.

pub mod bottleneck;
pub mod stage;
