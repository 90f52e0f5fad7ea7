//! # `DropPath` - drop path / stochastic depth.
//!
//! During training, a [`DropPath`] layer zeroes a sample's entire branch
//! with probability `drop_prob`, and rescales surviving samples by
//! ``1 / (1 - drop_prob)`` so the expected magnitude is unchanged. At
//! inference the layer is the identity.
//!
//! The drop decision is made once per sample; the mask broadcasts over
//! the channel and spatial dimensions.

use crate::utility::probability::expect_probability;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::Distribution;

/// [`DropPath`] Config.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// Probability of dropping a sample's branch.
    #[config(default = 0.0)]
    pub drop_prob: f64,
}

impl DropPathConfig {
    /// Initialize a [`DropPath`].
    ///
    /// # Panics
    ///
    /// If `drop_prob` is not in ``[0.0, 1.0)``; a drop probability of
    /// exactly 1 would leave nothing to rescale.
    pub fn init(&self) -> DropPath {
        let drop_prob = expect_probability(self.drop_prob);
        assert!(
            drop_prob < 1.0,
            "drop_prob must be less than 1.0: {drop_prob}"
        );
        DropPath { drop_prob }
    }
}

/// Drop path / stochastic depth layer.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping a sample's branch.
    pub drop_prob: f64,
}

impl DropPath {
    /// Forward Pass.
    ///
    /// A no-op unless the backend is in training mode (autodiff enabled)
    /// and `drop_prob` is non-zero.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A tensor of the same shape; each sample either zeroed or scaled
    /// by ``1 / (1 - drop_prob)``.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return input;
        }

        let keep_prob = 1.0 - self.drop_prob;
        let [batch, _, _, _] = input.dims();

        let mask: Tensor<B, 4> = Tensor::random(
            [batch, 1, 1, 1],
            Distribution::Bernoulli(keep_prob),
            &input.device(),
        );

        input * mask * (1.0 / keep_prob)
    }
}
