//! # TensorFlow-style ``SAME`` pooling.
//!
//! ``SAME`` padding pads asymmetrically (extra cell on the bottom/right),
//! such that the output extent is ``ceil(input / stride)``.

use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// Calculate asymmetric TensorFlow-like 'SAME' total padding.
///
/// ```text
/// max((ceil(size / stride) - 1) * stride + (kernel_size - 1) * dilation + 1 - size, 0)
/// ```
pub fn get_same_padding(
    size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> usize {
    let out_size = size.div_ceil(stride);
    ((out_size.max(1) - 1) * stride + (kernel_size - 1) * dilation + 1).saturating_sub(size)
}

/// Dynamically pad input x with 'SAME' padding for conv with specified args.
pub fn pad_same<B: Backend>(
    input: Tensor<B, 4>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
    dilation: [usize; 2],
    value: f32,
) -> Tensor<B, 4> {
    let [_, _, ih, iw] = input.dims();
    let pad_h = get_same_padding(ih, kernel_size[0], stride[0], dilation[0]);
    let pad_w = get_same_padding(iw, kernel_size[1], stride[1], dilation[1]);
    if pad_h == 0 && pad_w == 0 {
        return input;
    }
    input.pad(
        (pad_w / 2, pad_w - pad_w / 2, pad_h / 2, pad_h - pad_h / 2),
        value,
    )
}

/// [`AvgPool2dSame`] Config.
#[derive(Config, Debug)]
pub struct AvgPool2dSameConfig {
    /// The pooling kernel size.
    pub kernel_size: [usize; 2],

    /// The pooling stride.
    pub strides: [usize; 2],
}

impl AvgPool2dSameConfig {
    /// Initialize a [`AvgPool2dSame`].
    pub fn init(&self) -> AvgPool2dSame {
        AvgPool2dSame {
            pool: AvgPool2dConfig::new(self.kernel_size)
                .with_strides(self.strides)
                .with_padding(PaddingConfig2d::Valid)
                .with_count_include_pad(true)
                .init(),
        }
    }
}

/// `AvgPool2dSame`
///
/// Average pooling with TensorFlow ``SAME`` padding;
/// padded cells are excluded from each average.
#[derive(Module, Clone, Debug)]
pub struct AvgPool2dSame {
    pool: AvgPool2d,
}

impl AvgPool2dSame {
    /// The pooling kernel size.
    pub fn kernel_size(&self) -> [usize; 2] {
        self.pool.kernel_size
    }

    /// The pooling stride.
    pub fn stride(&self) -> [usize; 2] {
        self.pool.stride
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let stride = self.stride();
        [
            input_resolution[0].div_ceil(stride[0]),
            input_resolution[1].div_ceil(stride[1]),
        ]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, ceil(in_height/stride), ceil(in_width/stride)]``
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let kernel_size = self.kernel_size();
        let stride = self.stride();

        let sums = self
            .pool
            .forward(pad_same(input.clone(), kernel_size, stride, [1, 1], 0.0));

        // Fraction of each window which lies inside the input.
        let coverage = self.pool.forward(pad_same(
            Tensor::<B, 4>::ones([1, 1, height, width], &input.device()),
            kernel_size,
            stride,
            [1, 1],
            0.0,
        ));

        sums / coverage
    }
}
