//! # `ResNeXtBottleneck` Block
//!
//! The grouped-convolution bottleneck unit of the ResNeXt family:
//! 1. a 1x1 conv/norm/relu reducing to `filters` channels;
//! 2. a 3x3 [`GroupConv2d`] at the block stride, followed by one
//!    block-level batch norm and relu (normalization is applied once,
//!    after the grouped convolution, not per group);
//! 3. a 1x1 conv/norm/relu expanding to ``2 * filters`` channels;
//! 4. a parallel 1x1 conv/norm shortcut projecting the block input to
//!    ``2 * filters`` channels at the same stride;
//! 5. an elementwise add of the main path and the shortcut.
//!
//! Both paths share the stride and terminal channel count, so their
//! shapes agree before the add by construction.
//!
//! [`ResNeXtBottleneckMeta`] defines a common meta API for
//! [`ResNeXtBottleneck`] and [`ResNeXtBottleneckConfig`].

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::layers::conv::group_conv::{GroupConv2d, GroupConv2dConfig, GroupConv2dMeta};
use crate::layers::util::{same_padding_config, scalar_to_array, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResNeXtBottleneck`] Meta trait.
pub trait ResNeXtBottleneckMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Width of the grouped stage.
    fn filters(&self) -> usize;

    /// Cardinality of the grouped convolution.
    fn groups(&self) -> usize;

    /// The stride of the grouped stage and the shortcut.
    fn stride(&self) -> usize;

    /// Number of output channels.
    ///
    /// ``out_channels = 2 * filters``
    fn out_channels(&self) -> usize {
        2 * self.filters()
    }

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

/// [`ResNeXtBottleneck`] Config.
///
/// Implements [`ResNeXtBottleneckMeta`].
#[derive(Config, Debug)]
pub struct ResNeXtBottleneckConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Width of the grouped stage; the block emits ``2 * filters``
    /// channels.
    pub filters: usize,

    /// Cardinality of the grouped convolution.
    ///
    /// Must evenly divide `filters`.
    pub groups: usize,

    /// The stride of the grouped stage and the shortcut.
    #[config(default = 1)]
    pub stride: usize,
}

impl ResNeXtBottleneckMeta for ResNeXtBottleneckConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn filters(&self) -> usize {
        self.filters
    }

    fn groups(&self) -> usize {
        self.groups
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ResNeXtBottleneckConfig {
    /// Initialize a [`ResNeXtBottleneck`].
    ///
    /// # Panics
    ///
    /// If `filters` is not evenly divisible by `groups`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNeXtBottleneck<B> {
        let conv_reduce = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, self.filters], [1, 1]).with_bias(false),
        )
        .with_act(Some(ActivationConfig::Relu))
        .init(device);

        let conv_group = GroupConv2dConfig::new(
            [self.filters, self.filters],
            [3, 3],
            self.groups,
        )
        .with_stride(scalar_to_array(self.stride))
        .with_padding(same_padding_config([3, 3]))
        .with_bias(false)
        .init(device);

        let conv_expand = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.filters, 2 * self.filters], [1, 1]).with_bias(false),
        )
        .with_act(Some(ActivationConfig::Relu))
        .init(device);

        let shortcut = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, 2 * self.filters], [1, 1])
                .with_stride(scalar_to_array(self.stride))
                .with_bias(false),
        )
        .init(device);

        ResNeXtBottleneck {
            conv_reduce,
            conv_group,
            norm: BatchNormConfig::new(self.filters).init(device),
            act: ActivationConfig::Relu.init(),
            conv_expand,
            shortcut,
        }
    }
}

/// Bottleneck block of the ResNeXt family.
///
/// Implements [`ResNeXtBottleneckMeta`].
#[derive(Module, Debug)]
pub struct ResNeXtBottleneck<B: Backend> {
    /// 1x1 channel reduction.
    pub conv_reduce: ConvNorm2d<B>,

    /// 3x3 grouped convolution at the block stride.
    pub conv_group: GroupConv2d<B>,

    /// Block-level norm after the grouped convolution.
    pub norm: BatchNorm<B, 2>,

    /// Block-level activation after the grouped convolution.
    pub act: Activation,

    /// 1x1 channel expansion.
    pub conv_expand: ConvNorm2d<B>,

    /// Projected shortcut; no activation, per standard residual design.
    pub shortcut: ConvNorm2d<B>,
}

impl<B: Backend> ResNeXtBottleneckMeta for ResNeXtBottleneck<B> {
    fn in_channels(&self) -> usize {
        self.conv_reduce.in_channels()
    }

    fn filters(&self) -> usize {
        self.conv_reduce.out_channels()
    }

    fn groups(&self) -> usize {
        self.conv_group.groups()
    }

    fn stride(&self) -> usize {
        self.conv_group.stride()[0]
    }
}

impl<B: Backend> ResNeXtBottleneck<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels=2*filters, out_height, out_width]`` tensor.
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
            ]
        );

        let shortcut = self.shortcut.forward(input.clone());

        let x = self.conv_reduce.forward(input);
        let x = self.conv_group.forward(x);
        let x = self.norm.forward(x);
        let x = self.act.forward(x);
        let x = self.conv_expand.forward(x);

        // Both paths end at [batch, 2 * filters, out_height, out_width].
        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &shortcut,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        let output = x + shortcut;

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
