//! # `ConvNorm2d` Block
//!
//! A [`ConvNorm2d`] module is a [`Conv2d`] layer followed by a
//! [`BatchNorm`] layer and an optional [`Activation`] layer.
//!
//! Every composition in this crate is assembled from this unit; stages
//! that end without a nonlinearity (projection stages, residual
//! shortcuts) simply leave the activation unset.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::util::CONV_KERNEL_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];
}

/// [`ConvNorm2d`] Config.
///
/// Implements [`ConvNorm2dMeta`].
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`BatchNorm`] config.
    ///
    /// The feature size is auto-matched to the conv output channels.
    #[config(default = "BatchNormConfig::new(0)")]
    pub norm: BatchNormConfig,

    /// Optional activation applied after normalization.
    #[config(default = "None")]
    pub act: Option<ActivationConfig>,

    /// Convolution override initializer.
    #[config(default = "CONV_KERNEL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl From<Conv2dConfig> for ConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    ///
    /// Auto-matches the norm layer's feature size to the conv layer's
    /// output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let norm = BatchNormConfig {
            num_features: self.conv.channels[1],
            ..self.norm
        };

        ConvNorm2d {
            conv: self
                .conv
                .with_initializer(self.initializer)
                .init(device),
            norm: norm.init(device),
            act: self.act.map(|act| act.init()),
        }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`ConvNorm2dMeta`].
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal norm layer.
    pub norm: BatchNorm<B, 2>,

    /// Optional activation layer.
    pub act: Option<Activation>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = match &self.act {
            Some(act) => act.forward(x),
            None => x,
        };

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_conv_norm_config() {
        let inner_config = Conv2dConfig::new([2, 4], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false);

        let config: ConvNorm2dConfig = inner_config.clone().into();

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.groups(), 1);
        assert_eq!(config.stride(), [2, 2]);
        assert!(config.act.is_none());

        let config = config.with_act(Some(ActivationConfig::Relu));
        assert!(config.act.is_some());
    }

    #[test]
    fn test_conv_norm_forward() {
        let device = Default::default();

        let config = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false),
        );

        let layer: ConvNorm2d<TestBackend> = config.init(&device);
        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.groups(), 1);
        assert_eq!(layer.stride(), [2, 2]);
        assert_eq!(&layer.norm.gamma.shape().dims, &[4]);

        let input = Tensor::random([2, 2, 10, 10], Distribution::Default, &device);
        let output = layer.forward(input.clone());

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 5),
                ("out_width", 5)
            ]
        );

        let expected = {
            let x = layer.conv.forward(input);
            layer.norm.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_conv_norm_forward_with_act() {
        let device = Default::default();

        let config = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 2], [1, 1]).with_bias(false),
        )
        .with_act(Some(ActivationConfig::Relu));

        let layer: ConvNorm2d<TestBackend> = config.init(&device);

        let input = Tensor::random([2, 2, 4, 4], Distribution::Default, &device);
        let output = layer.forward(input.clone());

        let expected = {
            let x = layer.conv.forward(input);
            let x = layer.norm.forward(x);
            layer.act.as_ref().unwrap().forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
