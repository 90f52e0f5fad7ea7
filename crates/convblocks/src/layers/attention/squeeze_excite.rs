//! # `SqueezeExcite2d` - channel attention gate.
//!
//! A [`SqueezeExcite2d`] module computes per-channel scalar gates from
//! global spatial statistics and rescales the feature map channel-wise:
//! global-average-pool, a 1x1 bottleneck convolution with the configured
//! activation, a 1x1 expansion convolution with sigmoid activation, and
//! an elementwise multiply that broadcasts over the spatial dimensions.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::util::CONV_KERNEL_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Initializer, Sigmoid};
use burn::prelude::{Backend, Tensor};

/// [`SqueezeExcite2d`] Meta.
pub trait SqueezeExcite2dMeta {
    /// Number of gated channels.
    fn channels(&self) -> usize;

    /// Number of channels in the squeeze bottleneck.
    fn se_channels(&self) -> usize;
}

/// [`SqueezeExcite2d`] Config.
///
/// Implements [`SqueezeExcite2dMeta`].
#[derive(Config, Debug)]
pub struct SqueezeExcite2dConfig {
    /// Number of channels of the gated feature map.
    pub channels: usize,

    /// Number of channels in the squeeze bottleneck.
    pub se_channels: usize,

    /// Activation between the reduce and expand convolutions.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,

    /// Initializer for both 1x1 convolutions.
    #[config(default = "CONV_KERNEL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl SqueezeExcite2dMeta for SqueezeExcite2dConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn se_channels(&self) -> usize {
        self.se_channels
    }
}

impl SqueezeExcite2dConfig {
    /// Initialize a [`SqueezeExcite2d`].
    ///
    /// # Panics
    ///
    /// If `channels` or `se_channels` is zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SqueezeExcite2d<B> {
        assert!(self.channels > 0, "channels must be positive");
        assert!(self.se_channels > 0, "se_channels must be positive");

        SqueezeExcite2d {
            squeeze: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([self.channels, self.se_channels], [1, 1])
                .with_initializer(self.initializer.clone())
                .init(device),
            act: self.act.init(),
            expand: Conv2dConfig::new([self.se_channels, self.channels], [1, 1])
                .with_initializer(self.initializer.clone())
                .init(device),
            gate: Sigmoid,
        }
    }
}

/// Squeeze-and-excite channel attention gate.
///
/// Implements [`SqueezeExcite2dMeta`].
#[derive(Module, Debug)]
pub struct SqueezeExcite2d<B: Backend> {
    /// Global average pool over the spatial dimensions.
    pub squeeze: AdaptiveAvgPool2d,

    /// 1x1 bottleneck convolution.
    pub reduce: Conv2d<B>,

    /// Bottleneck activation.
    pub act: Activation,

    /// 1x1 expansion convolution.
    pub expand: Conv2d<B>,

    /// Gate nonlinearity; maps scores into ``(0, 1)``.
    pub gate: Sigmoid,
}

impl<B: Backend> SqueezeExcite2dMeta for SqueezeExcite2d<B> {
    fn channels(&self) -> usize {
        self.reduce.weight.shape().dims[1]
    }

    fn se_channels(&self) -> usize {
        self.reduce.weight.shape().dims[0]
    }
}

impl<B: Backend> SqueezeExcite2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A tensor of the same shape, rescaled channel-wise by gates in
    /// ``(0, 1)``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", self.channels())]
        );

        let se = self.squeeze.forward(input.clone());
        let se = self.reduce.forward(se);
        let se = self.act.forward(se);
        let se = self.expand.forward(se);
        let gates = self.gate.forward(se);

        let output = input * gates;

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &output,
            &[
                ("batch", batch),
                ("channels", self.channels()),
                ("height", height),
                ("width", width)
            ]
        );

        output
    }
}
