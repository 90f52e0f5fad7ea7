//! # `FusedMBConvBlock` for the EfficientNet family.
//!
//! The fused form of the mobile inverted bottleneck convolution: the
//! expansion and depthwise stages of the classic MBConv are fused into a
//! single full convolution.
//!
//! A [`FusedMBConvBlock`] applies:
//! 1. an optional fused expansion (conv/norm/activation), omitted
//!    entirely when `expand_ratio == 1`;
//! 2. an optional [`SqueezeExcite2d`] channel gate;
//! 3. a projection (conv/norm) to `output_filters` channels;
//! 4. an identity shortcut with optional [`DropPath`], added only when
//!    the stride is 1 and the channel count is unchanged.
//!
//! When the expansion stage exists it performs the spatial reduction and
//! the projection collapses to a 1x1/stride-1 conv; otherwise the
//! projection carries the block's kernel, stride, *and* nonlinearity.
//! The trailing activation in the unexpanded form is an intentional
//! asymmetry of the published design, not an oversight.
//!
//! [`FusedMBConvBlockMeta`] defines a common meta API for
//! [`FusedMBConvBlock`] and [`FusedMBConvBlockConfig`].

use crate::layers::activation::ActivationConfig;
use crate::layers::attention::squeeze_excite::{SqueezeExcite2d, SqueezeExcite2dConfig};
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::layers::util::{same_padding_config, scalar_to_array, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::BatchNormConfig;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`FusedMBConvBlock`] Meta trait.
pub trait FusedMBConvBlockMeta {
    /// Number of input channels.
    fn input_filters(&self) -> usize;

    /// Number of output channels.
    fn output_filters(&self) -> usize;

    /// Channel multiplier of the expansion stage.
    fn expand_ratio(&self) -> f64;

    /// Kernel size of the fused convolution.
    fn kernel_size(&self) -> usize;

    /// Spatial stride of the block.
    fn stride(&self) -> usize;

    /// Squeeze-excite bottleneck ratio, relative to `input_filters`.
    fn se_ratio(&self) -> f64;

    /// Whether the expansion stage exists.
    fn has_expansion(&self) -> bool {
        self.expand_ratio() != 1.0
    }

    /// Channels of the tensor leaving the expansion stage.
    ///
    /// ``round(input_filters * expand_ratio)``; equals `input_filters`
    /// when the expansion stage is omitted.
    fn expanded_filters(&self) -> usize {
        (self.input_filters() as f64 * self.expand_ratio()).round() as usize
    }

    /// Whether the squeeze-excite gate exists.
    fn has_squeeze_excite(&self) -> bool {
        self.se_ratio() > 0.0 && self.se_ratio() <= 1.0
    }

    /// Channels of the squeeze-excite bottleneck.
    ///
    /// ``max(1, round(input_filters * se_ratio))``; sized from the block
    /// input even though the gate acts on the expanded tensor.
    fn se_filters(&self) -> usize {
        ((self.input_filters() as f64 * self.se_ratio()).round() as usize).max(1)
    }

    /// Whether the identity shortcut is added.
    ///
    /// Requires stride 1 and an unchanged channel count; anything else
    /// would change the output shape away from the input shape.
    fn has_residual(&self) -> bool {
        self.stride() == 1 && self.input_filters() == self.output_filters()
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

/// [`FusedMBConvBlock`] Config.
///
/// Implements [`FusedMBConvBlockMeta`].
#[derive(Config, Debug)]
pub struct FusedMBConvBlockConfig {
    /// Number of input channels.
    pub input_filters: usize,

    /// Number of output channels.
    pub output_filters: usize,

    /// Channel multiplier of the expansion stage.
    ///
    /// When exactly 1, the expansion stage is omitted entirely.
    #[config(default = 1.0)]
    pub expand_ratio: f64,

    /// Kernel size of the fused convolution.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Spatial stride of the block.
    #[config(default = 1)]
    pub stride: usize,

    /// Squeeze-excite bottleneck ratio, relative to `input_filters`.
    ///
    /// The gate stage is active only when ``0 < se_ratio <= 1``.
    #[config(default = 0.0)]
    pub se_ratio: f64,

    /// Decay rate of the batch-norm running statistics.
    #[config(default = 0.9)]
    pub bn_momentum: f64,

    /// Nonlinearity of the expansion and squeeze-excite stages; also
    /// applied after the projection when the expansion stage is omitted.
    #[config(default = "ActivationConfig::Swish")]
    pub activation: ActivationConfig,

    /// Probability that a sample's residual branch is kept during
    /// training.
    #[config(default = 0.8)]
    pub survival_probability: f64,
}

impl FusedMBConvBlockMeta for FusedMBConvBlockConfig {
    fn input_filters(&self) -> usize {
        self.input_filters
    }

    fn output_filters(&self) -> usize {
        self.output_filters
    }

    fn expand_ratio(&self) -> f64 {
        self.expand_ratio
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn se_ratio(&self) -> f64 {
        self.se_ratio
    }
}

impl FusedMBConvBlockConfig {
    /// Initialize a [`FusedMBConvBlock`].
    ///
    /// # Panics
    ///
    /// If `expand_ratio` is not positive, `se_ratio` is outside
    /// ``[0.0, 1.0]``, `bn_momentum` is outside ``[0.0, 1.0)``, or
    /// `survival_probability` is outside ``(0.0, 1.0]``.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FusedMBConvBlock<B> {
        assert!(
            self.expand_ratio > 0.0,
            "expand_ratio must be positive: {}",
            self.expand_ratio,
        );
        assert!(
            self.expanded_filters() > 0,
            "expand_ratio must not round the expanded channels to zero: {}",
            self.expand_ratio,
        );
        assert!(
            (0.0..=1.0).contains(&self.se_ratio),
            "se_ratio must be in [0.0, 1.0]: {}",
            self.se_ratio,
        );
        assert!(
            (0.0..1.0).contains(&self.bn_momentum),
            "bn_momentum must be in [0.0, 1.0): {}",
            self.bn_momentum,
        );
        assert!(
            self.survival_probability > 0.0 && self.survival_probability <= 1.0,
            "survival_probability must be in (0.0, 1.0]: {}",
            self.survival_probability,
        );

        // burn's BatchNorm momentum weights the new observation, not the
        // running average.
        let norm = BatchNormConfig::new(0).with_momentum(1.0 - self.bn_momentum);

        let expand = if self.has_expansion() {
            ConvNorm2dConfig::new(
                Conv2dConfig::new(
                    [self.input_filters, self.expanded_filters()],
                    scalar_to_array(self.kernel_size),
                )
                .with_stride(scalar_to_array(self.stride))
                .with_padding(same_padding_config(scalar_to_array(self.kernel_size)))
                .with_bias(false),
            )
            .with_norm(norm.clone())
            .with_act(Some(self.activation.clone()))
            .init(device)
            .into()
        } else {
            None
        };

        let se = if self.has_squeeze_excite() {
            SqueezeExcite2dConfig::new(self.expanded_filters(), self.se_filters())
                .with_act(self.activation.clone())
                .init(device)
                .into()
        } else {
            None
        };

        // The projection performs the spatial reduction itself when
        // there is no expansion stage to do it, and it also inherits the
        // block nonlinearity in that case.
        let (kernel_size, stride) = match self.has_expansion() {
            true => (1, 1),
            false => (self.kernel_size, self.stride),
        };
        let project = ConvNorm2dConfig::new(
            Conv2dConfig::new(
                [self.expanded_filters(), self.output_filters],
                scalar_to_array(kernel_size),
            )
            .with_stride(scalar_to_array(stride))
            .with_padding(same_padding_config(scalar_to_array(kernel_size)))
            .with_bias(false),
        )
        .with_norm(norm)
        .with_act(match self.has_expansion() {
            true => None,
            false => Some(self.activation.clone()),
        })
        .init(device);

        let drop_path = if self.has_residual() && self.survival_probability < 1.0 {
            DropPathConfig::new()
                .with_drop_prob(1.0 - self.survival_probability)
                .init()
                .into()
        } else {
            None
        };

        FusedMBConvBlock {
            expand_ratio: self.expand_ratio,
            se_ratio: self.se_ratio,
            bn_momentum: self.bn_momentum,
            survival_probability: self.survival_probability,
            expand,
            se,
            project,
            drop_path,
        }
    }
}

/// Fused Mobile Inverted Bottleneck Convolution block.
///
/// Implements [`FusedMBConvBlockMeta`].
#[derive(Module, Debug)]
pub struct FusedMBConvBlock<B: Backend> {
    /// Channel multiplier of the expansion stage.
    pub expand_ratio: f64,

    /// Squeeze-excite bottleneck ratio.
    pub se_ratio: f64,

    /// Decay rate of the batch-norm running statistics.
    pub bn_momentum: f64,

    /// Residual keep probability.
    pub survival_probability: f64,

    /// Fused expansion stage; absent when `expand_ratio == 1`.
    pub expand: Option<ConvNorm2d<B>>,

    /// Channel attention gate; absent when `se_ratio == 0`.
    pub se: Option<SqueezeExcite2d<B>>,

    /// Projection stage.
    pub project: ConvNorm2d<B>,

    /// Stochastic depth on the residual branch.
    pub drop_path: Option<DropPath>,
}

impl<B: Backend> FusedMBConvBlockMeta for FusedMBConvBlock<B> {
    fn input_filters(&self) -> usize {
        match &self.expand {
            Some(expand) => expand.in_channels(),
            None => self.project.in_channels(),
        }
    }

    fn output_filters(&self) -> usize {
        self.project.out_channels()
    }

    fn expand_ratio(&self) -> f64 {
        self.expand_ratio
    }

    fn kernel_size(&self) -> usize {
        match &self.expand {
            Some(expand) => expand.conv.kernel_size[0],
            None => self.project.conv.kernel_size[0],
        }
    }

    fn stride(&self) -> usize {
        match &self.expand {
            Some(expand) => expand.stride()[0],
            None => self.project.stride()[0],
        }
    }

    fn se_ratio(&self) -> f64 {
        self.se_ratio
    }
}

impl<B: Backend> FusedMBConvBlock<B> {
    /// The block's activation choice.
    pub fn activation(&self) -> ActivationConfig {
        match &self.expand {
            Some(expand) => &expand.act,
            None => &self.project.act,
        }
        .as_ref()
        .expect("either the expansion or the projection stage carries the block activation")
        .to_config()
    }

    /// Create a config from this module.
    pub fn to_config(&self) -> FusedMBConvBlockConfig {
        FusedMBConvBlockConfig::new(self.input_filters(), self.output_filters())
            .with_expand_ratio(self.expand_ratio)
            .with_kernel_size(self.kernel_size())
            .with_stride(self.stride())
            .with_se_ratio(self.se_ratio)
            .with_bn_momentum(self.bn_momentum)
            .with_activation(self.activation())
            .with_survival_probability(self.survival_probability)
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, input_filters, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, output_filters, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "input_filters",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("input_filters", self.input_filters()),
                ("stride", self.stride())
            ]
        );

        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };

        let x = match &self.se {
            Some(se) => se.forward(x),
            None => x,
        };

        let x = self.project.forward(x);

        let x = if self.has_residual() {
            let x = match &self.drop_path {
                Some(drop_path) => drop_path.forward(x),
                None => x,
            };
            x + input
        } else {
            x
        };

        assert_shape_contract_periodically!(
            ["batch", "output_filters", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("output_filters", self.output_filters()),
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
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;
    type TrainBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_fused_mbconv_config() {
        let config = FusedMBConvBlockConfig::new(16, 16);
        assert_eq!(config.input_filters(), 16);
        assert_eq!(config.output_filters(), 16);
        assert_eq!(config.expand_ratio(), 1.0);
        assert_eq!(config.kernel_size(), 3);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.se_ratio(), 0.0);
        assert!(!config.has_expansion());
        assert!(!config.has_squeeze_excite());
        assert!(config.has_residual());
        assert_eq!(config.expanded_filters(), 16);

        let config = config
            .with_expand_ratio(4.0)
            .with_se_ratio(0.25)
            .with_stride(2);
        assert!(config.has_expansion());
        assert_eq!(config.expanded_filters(), 64);
        assert!(config.has_squeeze_excite());
        assert_eq!(config.se_filters(), 4);
        assert!(!config.has_residual());
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);
    }

    #[test]
    fn test_se_filters_floor() {
        let config = FusedMBConvBlockConfig::new(4, 4).with_se_ratio(0.01);
        assert_eq!(config.se_filters(), 1);
    }

    #[test]
    #[should_panic(expected = "se_ratio must be in [0.0, 1.0]: 1.5")]
    fn test_invalid_se_ratio() {
        let device = Default::default();
        let _block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(8, 8)
            .with_se_ratio(1.5)
            .init(&device);
    }

    #[test]
    #[should_panic(expected = "bn_momentum must be in [0.0, 1.0): 1")]
    fn test_invalid_bn_momentum() {
        let device = Default::default();
        let _block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(8, 8)
            .with_bn_momentum(1.0)
            .init(&device);
    }

    #[test]
    #[should_panic(expected = "survival_probability must be in (0.0, 1.0]: 0")]
    fn test_invalid_survival_probability() {
        let device = Default::default();
        let _block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(8, 8)
            .with_survival_probability(0.0)
            .init(&device);
    }

    #[test]
    fn test_residual_block_structure_and_shape() {
        let device = Default::default();

        let block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(16, 16)
            .with_expand_ratio(4.0)
            .with_se_ratio(0.25)
            .with_survival_probability(1.0)
            .init(&device);

        assert!(block.expand.is_some());
        assert!(block.se.is_some());
        assert!(block.has_residual());
        // A keep probability of 1 never drops; the layer is omitted.
        assert!(block.drop_path.is_none());

        // The expansion carries kernel, stride, and activation; the
        // projection collapses to an activation-free 1x1.
        let expand = block.expand.as_ref().unwrap();
        assert_eq!(expand.conv.kernel_size, [3, 3]);
        assert!(expand.act.is_some());
        assert_eq!(block.project.conv.kernel_size, [1, 1]);
        assert!(block.project.act.is_none());

        let input: Tensor<TestBackend, 4> =
            Tensor::random([2, 16, 8, 8], Distribution::Default, &device);
        let output = block.forward(input.clone());

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 2), ("channels", 16), ("height", 8), ("width", 8)]
        );

        // At inference the block is deterministic.
        let again = block.forward(input);
        output.to_data().assert_eq(&again.to_data(), true);
    }

    #[test]
    fn test_unexpanded_block_structure() {
        let device = Default::default();

        let block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(16, 32)
            .with_stride(2)
            .init(&device);

        // No expansion stage in the graph; the projection performs the
        // spatial reduction and keeps the block nonlinearity.
        assert!(block.expand.is_none());
        assert!(block.se.is_none());
        assert!(!block.has_residual());
        assert!(block.drop_path.is_none());
        assert_eq!(block.project.conv.kernel_size, [3, 3]);
        assert_eq!(block.project.stride(), [2, 2]);
        assert!(block.project.act.is_some());

        let input: Tensor<TestBackend, 4> =
            Tensor::random([2, 16, 8, 8], Distribution::Default, &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 2), ("channels", 32), ("height", 4), ("width", 4)]
        );
    }

    #[test]
    fn test_no_residual_when_channels_change() {
        let device = Default::default();

        let block: FusedMBConvBlock<TestBackend> = FusedMBConvBlockConfig::new(8, 24)
            .with_expand_ratio(2.0)
            .with_survival_probability(0.5)
            .init(&device);

        assert!(!block.has_residual());
        // No residual branch, so nothing to stochastically drop.
        assert!(block.drop_path.is_none());

        let input: Tensor<TestBackend, 4> =
            Tensor::random([2, 8, 6, 6], Distribution::Default, &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 2), ("channels", 24), ("height", 6), ("width", 6)]
        );
    }

    #[test]
    fn test_stochastic_depth_exercised_in_training() {
        let device = Default::default();

        let batch = 32;
        let block: FusedMBConvBlock<TrainBackend> = FusedMBConvBlockConfig::new(8, 8)
            .with_expand_ratio(2.0)
            .with_survival_probability(0.5)
            .init(&device);

        assert!(block.drop_path.is_some());

        let input: Tensor<TrainBackend, 4> =
            Tensor::random([batch, 8, 4, 4], Distribution::Default, &device);
        let output = block.forward(input.clone());

        // A dropped sample's branch contributes exactly zero, leaving
        // the shortcut; a kept sample differs from its input.
        let mut dropped = 0;
        let mut kept = 0;
        for b in 0..batch {
            let sample_in = input.clone().narrow(0, b, 1);
            let sample_out = output.clone().narrow(0, b, 1);
            if sample_out.equal(sample_in).all().into_scalar() {
                dropped += 1;
            } else {
                kept += 1;
            }
        }
        assert_eq!(kept + dropped, batch);
        // With 32 samples at p=0.5, an all-kept or all-dropped draw is
        // a 2^-31 event.
        assert!(kept > 0);
        assert!(dropped > 0);
    }

    #[test]
    fn test_record_roundtrip() {
        let device = Default::default();

        let config = FusedMBConvBlockConfig::new(8, 8)
            .with_expand_ratio(2.0)
            .with_se_ratio(0.5)
            .with_survival_probability(1.0);

        let source: FusedMBConvBlock<TestBackend> = config.init(&device);

        let input: Tensor<TestBackend, 4> =
            Tensor::random([2, 8, 6, 6], Distribution::Default, &device);
        let output1 = source.forward(input.clone());

        let record = source.into_record();
        let reloaded: FusedMBConvBlock<TestBackend> =
            config.init(&device).load_record(record);
        let output2 = reloaded.forward(input);

        output1.to_data().assert_eq(&output2.to_data(), true);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = FusedMBConvBlockConfig::new(24, 24)
            .with_expand_ratio(4.0)
            .with_kernel_size(3)
            .with_stride(1)
            .with_se_ratio(0.25)
            .with_bn_momentum(0.99)
            .with_activation(ActivationConfig::Swish)
            .with_survival_probability(0.8);

        let json = serde_json::to_string(&config).unwrap();
        let restored: FusedMBConvBlockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(format!("{restored:?}"), format!("{config:?}"));

        let device = Default::default();
        let block: FusedMBConvBlock<TestBackend> = restored.init(&device);
        assert_eq!(
            format!("{:?}", block.to_config()),
            format!("{config:?}")
        );
    }
}
