//! # Layer Construction Utilities

use bimm_contracts::unpack_shape_contract;
use burn::nn::{Initializer, PaddingConfig2d};

/// Fan-out scaled He initializer for convolutions feeding a nonlinearity.
///
/// The truncated-normal fan-out scaling used by the EfficientNet family;
/// equivalent to ``VarianceScaling(scale=2.0, mode="fan_out")``.
pub const CONV_KERNEL_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: core::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Lift a scalar convolution parameter to its square ``[v, v]`` form.
#[inline(always)]
pub fn scalar_to_array(v: usize) -> [usize; 2] {
    [v, v]
}

/// Build an explicit "same" padding config for an odd-sized kernel.
///
/// With stride ``s``, an input resolution that is a multiple of ``s``
/// maps to exactly ``input / s``.
pub fn same_padding_config(kernel_size: [usize; 2]) -> PaddingConfig2d {
    PaddingConfig2d::Explicit(kernel_size[0] / 2, kernel_size[1] / 2)
}

/// Get the output resolution for a given input resolution.
///
/// The input must be a multiple of the stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "height_in" = "height_out" * "stride",
            "width_in" = "width_out" * "stride"
        ],
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_to_array() {
        assert_eq!(scalar_to_array(3), [3, 3]);
    }

    #[test]
    fn test_same_padding_config() {
        assert!(matches!(
            same_padding_config([3, 3]),
            PaddingConfig2d::Explicit(1, 1)
        ));
        assert!(matches!(
            same_padding_config([1, 5]),
            PaddingConfig2d::Explicit(0, 2)
        ));
    }

    #[test]
    fn test_stride_div_output_resolution() {
        assert_eq!(stride_div_output_resolution([8, 12], 2), [4, 6]);
        assert_eq!(stride_div_output_resolution([8, 12], 1), [8, 12]);
    }

    #[test]
    #[should_panic(expected = "7 !~ height_in=(height_out*stride)")]
    fn test_stride_div_output_resolution_panic() {
        stride_div_output_resolution([7, 8], 2);
    }
}
