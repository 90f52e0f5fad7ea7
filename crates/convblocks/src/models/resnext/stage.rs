//! # `ResNeXtStage`
//!
//! A [`ResNeXtStage`] is a sequence of [`ResNeXtBottleneck`] blocks as
//! the model builders stack them: the first block carries the stage
//! stride and channel projection, the rest run at stride 1 from the
//! stage's ``2 * filters`` output width.
//!
//! [`ResNeXtStageMeta`] defines a common meta API for [`ResNeXtStage`]
//! and [`ResNeXtStageConfig`].

use crate::layers::util::stride_div_output_resolution;
use crate::models::resnext::bottleneck::{
    ResNeXtBottleneck, ResNeXtBottleneckConfig, ResNeXtBottleneckMeta,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`ResNeXtStage`] Meta API.
pub trait ResNeXtStageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the effective stride of the stage.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
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

/// [`ResNeXtStage`] Configuration.
///
/// Implements [`ResNeXtStageMeta`].
#[derive(Config, Debug)]
pub struct ResNeXtStageConfig {
    /// The component blocks.
    pub blocks: Vec<ResNeXtBottleneckConfig>,
}

impl From<Vec<ResNeXtBottleneckConfig>> for ResNeXtStageConfig {
    fn from(blocks: Vec<ResNeXtBottleneckConfig>) -> Self {
        Self { blocks }
    }
}

impl ResNeXtStageMeta for ResNeXtStageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_channels(&self) -> usize {
        self.blocks[0].in_channels()
    }

    fn out_channels(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_channels()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl ResNeXtStageConfig {
    /// Build a stage config.
    ///
    /// # Arguments
    ///
    /// - `num_blocks`: number of bottleneck blocks.
    /// - `in_channels`: input channels of the first block.
    /// - `filters`: grouped-stage width of every block; the stage emits
    ///   ``2 * filters`` channels.
    /// - `stride`: stride of the first block; the rest use stride 1.
    /// - `groups`: cardinality of every block.
    pub fn build(
        num_blocks: usize,
        in_channels: usize,
        filters: usize,
        stride: usize,
        groups: usize,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    ResNeXtBottleneckConfig::new(in_channels, filters, groups)
                        .with_stride(stride)
                } else {
                    ResNeXtBottleneckConfig::new(2 * filters, filters, groups)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_channels() != curr.in_channels() {
                return Err(format!(
                    "block[{}].out_channels({}) != block[{}].in_channels({})\n{:#?}",
                    idx - 1,
                    prev.out_channels(),
                    idx,
                    curr.in_channels(),
                    self,
                ));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a [`ResNeXtStage`].
    ///
    /// # Panics
    ///
    /// If the config fails [`ResNeXtStageConfig::try_validate`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResNeXtStage<B> {
        self.expect_valid();

        ResNeXtStage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// A sequence of [`ResNeXtBottleneck`] blocks.
///
/// Implements [`ResNeXtStageMeta`].
#[derive(Module, Debug)]
pub struct ResNeXtStage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResNeXtBottleneck<B>>,
}

impl<B: Backend> ResNeXtStageMeta for ResNeXtStage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_channels(&self) -> usize {
        self.blocks[0].in_channels()
    }

    fn out_channels(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_channels()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> ResNeXtStage<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride())
            ],
        );

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}
