//! # `GroupConv2d` Layer
//!
//! A [`GroupConv2d`] module splits the channel dimension of its input
//! into `groups` equal contiguous partitions, convolves each partition
//! with its own independent filter bank, and concatenates the per-group
//! results along the channel dimension, in partition order.
//!
//! The layer owns one [`Conv2d`] per group, built once at init time and
//! never resized; partition `i` is always convolved by `convs[i]` and
//! lands at channel offset ``i * group_out_channels`` of the output.

use crate::layers::util::CONV_KERNEL_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// [`GroupConv2d`] Meta.
pub trait GroupConv2dMeta {
    /// Number of channel groups.
    fn groups(&self) -> usize;

    /// Total number of input channels.
    fn in_channels(&self) -> usize;

    /// Total number of output channels.
    fn out_channels(&self) -> usize;

    /// Input channels consumed by each group.
    fn group_in_channels(&self) -> usize {
        self.in_channels() / self.groups()
    }

    /// Output channels produced by each group.
    fn group_out_channels(&self) -> usize {
        self.out_channels() / self.groups()
    }

    /// Get the stride.
    fn stride(&self) -> [usize; 2];
}

/// [`GroupConv2d`] Config.
///
/// Implements [`GroupConv2dMeta`].
#[derive(Config, Debug)]
pub struct GroupConv2dConfig {
    /// Total input/output channel counts.
    ///
    /// Both must be evenly divisible by `groups`.
    pub channels: [usize; 2],

    /// Kernel size of every per-group convolution.
    pub kernel_size: [usize; 2],

    /// Number of channel groups.
    pub groups: usize,

    /// Stride shared by every per-group convolution.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],

    /// Padding shared by every per-group convolution.
    #[config(default = "PaddingConfig2d::Valid")]
    pub padding: PaddingConfig2d,

    /// Whether the per-group convolutions carry a bias.
    #[config(default = true)]
    pub bias: bool,

    /// Initializer for the per-group convolutions.
    #[config(default = "CONV_KERNEL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl GroupConv2dMeta for GroupConv2dConfig {
    fn groups(&self) -> usize {
        self.groups
    }

    fn in_channels(&self) -> usize {
        self.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }
}

impl GroupConv2dConfig {
    /// Initialize a [`GroupConv2d`].
    ///
    /// # Panics
    ///
    /// If `groups` is zero, or either channel count is not evenly
    /// divisible by `groups`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GroupConv2d<B> {
        assert!(self.groups > 0, "groups must be positive");
        assert!(
            self.channels[0] % self.groups == 0,
            "input channels ({}) must be evenly divisible by groups ({})",
            self.channels[0],
            self.groups,
        );
        assert!(
            self.channels[1] % self.groups == 0,
            "output channels ({}) must be evenly divisible by groups ({})",
            self.channels[1],
            self.groups,
        );

        let group_channels = [
            self.channels[0] / self.groups,
            self.channels[1] / self.groups,
        ];

        GroupConv2d {
            convs: (0..self.groups)
                .map(|_| {
                    Conv2dConfig::new(group_channels, self.kernel_size)
                        .with_stride(self.stride)
                        .with_padding(self.padding.clone())
                        .with_bias(self.bias)
                        .with_initializer(self.initializer.clone())
                        .init(device)
                })
                .collect(),
        }
    }
}

/// Grouped 2d convolution layer.
///
/// Implements [`GroupConv2dMeta`].
#[derive(Module, Debug)]
pub struct GroupConv2d<B: Backend> {
    /// Per-group convolutions, indexed by group.
    pub convs: Vec<Conv2d<B>>,
}

impl<B: Backend> GroupConv2dMeta for GroupConv2d<B> {
    fn groups(&self) -> usize {
        self.convs.len()
    }

    fn in_channels(&self) -> usize {
        self.convs[0].weight.shape().dims[1] * self.groups()
    }

    fn out_channels(&self) -> usize {
        self.convs[0].weight.shape().dims[0] * self.groups()
    }

    fn stride(&self) -> [usize; 2] {
        self.convs[0].stride
    }
}

impl<B: Backend> GroupConv2d<B> {
    /// Forward Pass.
    ///
    /// Group `i` convolves input channels
    /// ``[i * group_in_channels, (i + 1) * group_in_channels)``; the
    /// per-group outputs are concatenated along the channel dimension in
    /// group order.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, _in_height, _in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );

        let group_in = self.group_in_channels();
        let feature_maps: Vec<Tensor<B, 4>> = self
            .convs
            .iter()
            .enumerate()
            .map(|(i, conv)| {
                conv.forward(input.clone().narrow(1, i * group_in, group_in))
            })
            .collect();

        let [_, _, out_height, out_width] = feature_maps[0].dims();
        let output = Tensor::cat(feature_maps, 1);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        output
    }
}
