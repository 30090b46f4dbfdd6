//! Float reference implementation
//!
//! The same network evaluated in f32 with f64 accumulation. It is the oracle
//! the fixed-point engine is measured against; nothing here is quantized.

use qlenet_fixed_point::{Matrix, Tensor3, Tensor4, Vector};
use qlenet_layers::max_pool2x2;
use qlenet_model::config::{
    Conv1Output, Conv2Output, Pool1Output, Pool2Output, FC1_IN,
};
use qlenet_model::{FloatParams, Image, LayerOutputs, Scores};

/// Valid stride-1 convolution with bias and ReLU
pub fn conv2d_relu<
    const CIN: usize,
    const H: usize,
    const W: usize,
    const COUT: usize,
    const K: usize,
    const OH: usize,
    const OW: usize,
>(
    input: &Tensor3<f32, CIN, H, W>,
    kernel: &Tensor4<f32, COUT, CIN, K, K>,
    bias: &Vector<f32, COUT>,
) -> Tensor3<f32, COUT, OH, OW> {
    const { assert!(OH == H - K + 1 && OW == W - K + 1, "output must be (H-K+1) x (W-K+1)") };

    Tensor3::from_fn(|[f, y, x]| {
        let mut acc = bias[f] as f64;
        for c in 0..CIN {
            for ky in 0..K {
                for kx in 0..K {
                    acc += kernel[[f, c, ky, kx]] as f64 * input[[c, y + ky, x + kx]] as f64;
                }
            }
        }
        (acc as f32).max(0.0)
    })
}

/// Dense layer; `relu` selects the activation
pub fn fully_connected<const IN: usize, const OUT: usize>(
    input: &Vector<f32, IN>,
    weight: &Matrix<f32, OUT, IN>,
    bias: &Vector<f32, OUT>,
    relu: bool,
) -> Vector<f32, OUT> {
    Vector::from_fn(|[n]| {
        let acc = weight
            .row(n)
            .iter()
            .zip(input.iter())
            .fold(bias[n] as f64, |acc, (&w, &x)| acc + w as f64 * x as f64);
        let out = acc as f32;
        if relu {
            out.max(0.0)
        } else {
            out
        }
    })
}

/// Max-subtracted softmax in f64
pub fn softmax<const K: usize>(scores: &Vector<f32, K>) -> Vector<f32, K> {
    let max = scores.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v)) as f64;
    let exps = scores.map(|&s| (s as f64 - max).exp());
    let sum: f64 = exps.iter().sum();
    exps.map(|&e| (e / sum) as f32)
}

/// Float forward pass keeping every intermediate
pub fn forward_traced(image: &Image<f32>, params: &FloatParams) -> LayerOutputs<f32> {
    let conv1: Conv1Output<f32> = conv2d_relu(image, &params.conv1_kernel, &params.conv1_bias);
    let pool1: Pool1Output<f32> = max_pool2x2(&conv1);
    let conv2: Conv2Output<f32> = conv2d_relu(&pool1, &params.conv2_kernel, &params.conv2_bias);
    let pool2: Pool2Output<f32> = max_pool2x2(&conv2);
    let flat: Vector<f32, FC1_IN> = pool2.clone().flatten();
    let fc1 = fully_connected(&flat, &params.fc1_weight, &params.fc1_bias, true);
    let logits = fully_connected(&fc1, &params.fc2_weight, &params.fc2_bias, false);
    let probabilities = softmax(&logits);

    LayerOutputs {
        conv1,
        pool1,
        conv2,
        pool2,
        fc1,
        logits,
        probabilities,
    }
}

/// Float class probabilities
pub fn forward(image: &Image<f32>, params: &FloatParams) -> Scores<f32> {
    forward_traced(image, params).probabilities
}
