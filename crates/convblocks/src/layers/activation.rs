//! # Activation Layer Wrapper
//!
//! A serializable selection of the pointwise nonlinearities used by the
//! convolution blocks in this crate. All supported activations are
//! stateless, so the wrapper needs no backend parameter and no device to
//! initialize.

use burn::nn::{Gelu, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::silu;

/// Swish activation layer, ``x * sigmoid(x)``.
///
/// Also known as SiLU; the default nonlinearity of the EfficientNet
/// block family.
#[derive(Module, Clone, Debug, Default)]
pub struct Swish;

impl Swish {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        silu(input)
    }
}

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu`] activation layer.
    Relu,

    /// [`Swish`] activation layer.
    Swish,

    /// [`Gelu`] activation layer.
    Gelu,

    /// [`Sigmoid`] activation layer.
    Sigmoid,

    /// [`Tanh`] activation layer.
    Tanh,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl ActivationConfig {
    /// Initialize a wrapped activation layer.
    pub fn init(&self) -> Activation {
        match self {
            ActivationConfig::Relu => Activation::Relu(Relu),
            ActivationConfig::Swish => Activation::Swish(Swish),
            ActivationConfig::Gelu => Activation::Gelu(Gelu),
            ActivationConfig::Sigmoid => Activation::Sigmoid(Sigmoid),
            ActivationConfig::Tanh => Activation::Tanh(Tanh),
        }
    }
}

/// Activation Layer Wrapper.
///
/// Every variant is parameter-free; the enum exists so block configs can
/// name their nonlinearity and round-trip it through serialization.
#[derive(Module, Clone, Debug)]
#[non_exhaustive]
pub enum Activation {
    /// [`Relu`] activation layer.
    Relu(Relu),

    /// [`Swish`] activation layer.
    Swish(Swish),

    /// [`Gelu`] activation layer.
    Gelu(Gelu),

    /// [`Sigmoid`] activation layer.
    Sigmoid(Sigmoid),

    /// [`Tanh`] activation layer.
    Tanh(Tanh),
}

impl Activation {
    /// Forward pass.
    #[tracing::instrument]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu(layer) => layer.forward(input),
            Activation::Swish(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
            Activation::Sigmoid(layer) => layer.forward(input),
            Activation::Tanh(layer) => layer.forward(input),
        }
    }

    /// Build a [`ActivationConfig`] for this module.
    pub fn to_config(&self) -> ActivationConfig {
        match self {
            Activation::Relu(_) => ActivationConfig::Relu,
            Activation::Swish(_) => ActivationConfig::Swish,
            Activation::Gelu(_) => ActivationConfig::Gelu,
            Activation::Sigmoid(_) => ActivationConfig::Sigmoid,
            Activation::Tanh(_) => ActivationConfig::Tanh,
        }
    }
}
