//! Model weight structures

use qlenet_fixed_point::{Fixed, QuantizationReport, Vector};
use rand::Rng;

use crate::config::{
    Conv1Kernel, Conv2Kernel, Fc1Weight, Fc2Weight, CONV1_DIM, CONV1_OUT, CONV2_DIM, CONV2_OUT,
    FC1_IN, FC1_OUT, FC2_OUT, IMG_DEPTH,
};
use crate::error::{ModelError, Result};

/// Canonical tensor names, in storage order
pub const TENSOR_NAMES: [&str; 8] = [
    "conv1.weight",
    "conv1.bias",
    "conv2.weight",
    "conv2.bias",
    "fc1.weight",
    "fc1.bias",
    "fc2.weight",
    "fc2.bias",
];

/// Complete parameter set of the network.
///
/// Owned by the caller and borrowed by every forward pass; nothing here is
/// mutated during inference.
#[derive(Debug, Clone, PartialEq)]
pub struct LeNetParams<T> {
    /// `[20, 1, 5, 5]`
    pub conv1_kernel: Conv1Kernel<T>,
    pub conv1_bias: Vector<T, CONV1_OUT>,
    /// `[40, 20, 5, 5]`
    pub conv2_kernel: Conv2Kernel<T>,
    pub conv2_bias: Vector<T, CONV2_OUT>,
    /// `[400, 640]`, columns in channel-major pool2 order
    pub fc1_weight: Fc1Weight<T>,
    pub fc1_bias: Vector<T, FC1_OUT>,
    /// `[10, 400]`
    pub fc2_weight: Fc2Weight<T>,
    pub fc2_bias: Vector<T, FC2_OUT>,
}

/// Parameters as trained
pub type FloatParams = LeNetParams<f32>;
/// Parameters quantized to Q(S)
pub type FixedParams<const S: u32> = LeNetParams<Fixed<S>>;

impl<T> LeNetParams<T> {
    /// Total number of scalars across all tensors
    pub const PARAMETER_COUNT: usize = Conv1Kernel::<T>::LEN
        + CONV1_OUT
        + Conv2Kernel::<T>::LEN
        + CONV2_OUT
        + Fc1Weight::<T>::LEN
        + FC1_OUT
        + Fc2Weight::<T>::LEN
        + FC2_OUT;

    /// Flat views of every tensor, paired with its canonical name
    pub fn tensors(&self) -> [(&'static str, &[T]); 8] {
        [
            (TENSOR_NAMES[0], self.conv1_kernel.as_slice()),
            (TENSOR_NAMES[1], self.conv1_bias.as_slice()),
            (TENSOR_NAMES[2], self.conv2_kernel.as_slice()),
            (TENSOR_NAMES[3], self.conv2_bias.as_slice()),
            (TENSOR_NAMES[4], self.fc1_weight.as_slice()),
            (TENSOR_NAMES[5], self.fc1_bias.as_slice()),
            (TENSOR_NAMES[6], self.fc2_weight.as_slice()),
            (TENSOR_NAMES[7], self.fc2_bias.as_slice()),
        ]
    }
}

impl<T: Clone + Default> LeNetParams<T> {
    /// All-zero parameters
    pub fn zeros() -> Self {
        Self {
            conv1_kernel: Conv1Kernel::zeros(),
            conv1_bias: Vector::zeros(),
            conv2_kernel: Conv2Kernel::zeros(),
            conv2_bias: Vector::zeros(),
            fc1_weight: Fc1Weight::zeros(),
            fc1_bias: Vector::zeros(),
            fc2_weight: Fc2Weight::zeros(),
            fc2_bias: Vector::zeros(),
        }
    }
}

/// Canonical shape of a named tensor
pub fn tensor_shape(name: &str) -> Option<&'static [usize]> {
    TENSOR_NAMES
        .iter()
        .position(|&n| n == name)
        .map(|i| TENSOR_SHAPES[i])
}

/// Canonical shapes, parallel to [`TENSOR_NAMES`]
pub const TENSOR_SHAPES: [&[usize]; 8] = [
    &[CONV1_OUT, IMG_DEPTH, CONV1_DIM, CONV1_DIM],
    &[CONV1_OUT],
    &[CONV2_OUT, CONV1_OUT, CONV2_DIM, CONV2_DIM],
    &[CONV2_OUT],
    &[FC1_OUT, FC1_IN],
    &[FC1_OUT],
    &[FC2_OUT, FC1_OUT],
    &[FC2_OUT],
];

fn tensor_from_vec<X, F>(index: usize, data: Vec<f32>, build: F) -> Result<X>
where
    F: FnOnce(Vec<f32>) -> qlenet_fixed_point::Result<X>,
{
    let got = data.len();
    build(data).map_err(|_| ModelError::InvalidShape {
        tensor: TENSOR_NAMES[index].to_string(),
        expected: TENSOR_SHAPES[index].to_vec(),
        got: vec![got],
    })
}

impl LeNetParams<f32> {
    /// Assemble from flat canonical-layout buffers ordered as [`TENSOR_NAMES`]
    pub fn from_flat(tensors: [Vec<f32>; 8]) -> Result<Self> {
        let [c1w, c1b, c2w, c2b, f1w, f1b, f2w, f2b] = tensors;
        Ok(Self {
            conv1_kernel: tensor_from_vec(0, c1w, Conv1Kernel::from_vec)?,
            conv1_bias: tensor_from_vec(1, c1b, Vector::from_vec)?,
            conv2_kernel: tensor_from_vec(2, c2w, Conv2Kernel::from_vec)?,
            conv2_bias: tensor_from_vec(3, c2b, Vector::from_vec)?,
            fc1_weight: tensor_from_vec(4, f1w, Fc1Weight::from_vec)?,
            fc1_bias: tensor_from_vec(5, f1b, Vector::from_vec)?,
            fc2_weight: tensor_from_vec(6, f2w, Fc2Weight::from_vec)?,
            fc2_bias: tensor_from_vec(7, f2b, Vector::from_vec)?,
        })
    }

    /// Random parameters (for testing)
    ///
    /// Weights are uniform in ±sqrt(2 / fan_in) (Kaiming-like), biases in ±0.05.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let conv1_bound = (2.0 / (IMG_DEPTH * CONV1_DIM * CONV1_DIM) as f32).sqrt();
        let conv2_bound = (2.0 / (CONV1_OUT * CONV2_DIM * CONV2_DIM) as f32).sqrt();
        let fc1_bound = (2.0 / FC1_IN as f32).sqrt();
        let fc2_bound = (2.0 / FC1_OUT as f32).sqrt();

        Self {
            conv1_kernel: Conv1Kernel::from_fn(|_| rng.gen_range(-conv1_bound..conv1_bound)),
            conv1_bias: Vector::from_fn(|_| rng.gen_range(-0.05..0.05)),
            conv2_kernel: Conv2Kernel::from_fn(|_| rng.gen_range(-conv2_bound..conv2_bound)),
            conv2_bias: Vector::from_fn(|_| rng.gen_range(-0.05..0.05)),
            fc1_weight: Fc1Weight::from_fn(|_| rng.gen_range(-fc1_bound..fc1_bound)),
            fc1_bias: Vector::from_fn(|_| rng.gen_range(-0.05..0.05)),
            fc2_weight: Fc2Weight::from_fn(|_| rng.gen_range(-fc2_bound..fc2_bound)),
            fc2_bias: Vector::from_fn(|_| rng.gen_range(-0.05..0.05)),
        }
    }

    /// Quantize every tensor to Q(S)
    pub fn quantize<const S: u32>(&self) -> FixedParams<S> {
        self.quantize_with_report::<S>().0
    }

    /// Quantize every tensor to Q(S), accumulating a saturation/error report
    pub fn quantize_with_report<const S: u32>(&self) -> (FixedParams<S>, QuantizationReport) {
        let mut report = QuantizationReport::default();
        let mut merge = |r: QuantizationReport| report.merge(&r);

        let (conv1_kernel, r) = self.conv1_kernel.quantize_with_report::<S>();
        merge(r);
        let (conv1_bias, r) = self.conv1_bias.quantize_with_report::<S>();
        merge(r);
        let (conv2_kernel, r) = self.conv2_kernel.quantize_with_report::<S>();
        merge(r);
        let (conv2_bias, r) = self.conv2_bias.quantize_with_report::<S>();
        merge(r);
        let (fc1_weight, r) = self.fc1_weight.quantize_with_report::<S>();
        merge(r);
        let (fc1_bias, r) = self.fc1_bias.quantize_with_report::<S>();
        merge(r);
        let (fc2_weight, r) = self.fc2_weight.quantize_with_report::<S>();
        merge(r);
        let (fc2_bias, r) = self.fc2_bias.quantize_with_report::<S>();
        merge(r);

        let params = LeNetParams {
            conv1_kernel,
            conv1_bias,
            conv2_kernel,
            conv2_bias,
            fc1_weight,
            fc1_bias,
            fc2_weight,
            fc2_bias,
        };
        (params, report)
    }
}

impl<const S: u32> LeNetParams<Fixed<S>> {
    pub fn dequantize(&self) -> FloatParams {
        LeNetParams {
            conv1_kernel: self.conv1_kernel.dequantize(),
            conv1_bias: self.conv1_bias.dequantize(),
            conv2_kernel: self.conv2_kernel.dequantize(),
            conv2_bias: self.conv2_bias.dequantize(),
            fc1_weight: self.fc1_weight.dequantize(),
            fc1_bias: self.fc1_bias.dequantize(),
            fc2_weight: self.fc2_weight.dequantize(),
            fc2_bias: self.fc2_bias.dequantize(),
        }
    }
}
