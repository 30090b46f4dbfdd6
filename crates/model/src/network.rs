//! LeNet-5 forward pass
//!
//! conv1 → pool1 → conv2 → pool2 → flatten → fc1 → fc2 → softmax, entirely
//! in Q(S). The pass is a pure function of the input and borrowed
//! parameters; intermediates are allocated per call.

use qlenet_fixed_point::{Fixed, QuantizationReport, Vector};
use qlenet_layers::{conv2d_relu, fully_connected, max_pool2x2, softmax, Activation};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{
    Conv1Output, Conv2Output, Fc1Output, Image, Pool1Output, Pool2Output, Scores, FC1_IN,
};
use crate::weights::{FixedParams, FloatParams};

/// Every intermediate activation of one forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct LayerOutputs<T> {
    pub conv1: Conv1Output<T>,
    pub pool1: Pool1Output<T>,
    pub conv2: Conv2Output<T>,
    pub pool2: Pool2Output<T>,
    pub fc1: Fc1Output<T>,
    /// FC2 output before softmax
    pub logits: Scores<T>,
    pub probabilities: Scores<T>,
}

/// Run the network on one image and return class probabilities
pub fn forward<const S: u32>(input: &Image<Fixed<S>>, params: &FixedParams<S>) -> Scores<Fixed<S>> {
    softmax(&logits(input, params))
}

/// Network output before the softmax layer
pub fn logits<const S: u32>(input: &Image<Fixed<S>>, params: &FixedParams<S>) -> Scores<Fixed<S>> {
    let conv1: Conv1Output<Fixed<S>> = conv2d_relu(input, &params.conv1_kernel, &params.conv1_bias);
    let pool1: Pool1Output<Fixed<S>> = max_pool2x2(&conv1);
    let conv2: Conv2Output<Fixed<S>> = conv2d_relu(&pool1, &params.conv2_kernel, &params.conv2_bias);
    let pool2: Pool2Output<Fixed<S>> = max_pool2x2(&conv2);
    let flat: Vector<Fixed<S>, FC1_IN> = pool2.flatten();
    let fc1 = fully_connected(&flat, &params.fc1_weight, &params.fc1_bias, Activation::Relu);
    fully_connected(&fc1, &params.fc2_weight, &params.fc2_bias, Activation::Identity)
}

/// Like [`forward`], keeping every intermediate
pub fn forward_traced<const S: u32>(
    input: &Image<Fixed<S>>,
    params: &FixedParams<S>,
) -> LayerOutputs<Fixed<S>> {
    let conv1: Conv1Output<Fixed<S>> = conv2d_relu(input, &params.conv1_kernel, &params.conv1_bias);
    let pool1: Pool1Output<Fixed<S>> = max_pool2x2(&conv1);
    let conv2: Conv2Output<Fixed<S>> = conv2d_relu(&pool1, &params.conv2_kernel, &params.conv2_bias);
    let pool2: Pool2Output<Fixed<S>> = max_pool2x2(&conv2);
    let flat: Vector<Fixed<S>, FC1_IN> = pool2.clone().flatten();
    let fc1 = fully_connected(&flat, &params.fc1_weight, &params.fc1_bias, Activation::Relu);
    let logits = fully_connected(&fc1, &params.fc2_weight, &params.fc2_bias, Activation::Identity);
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

/// Classification result for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Most probable digit; the lowest index wins ties
    pub class: usize,
    /// Probability of `class`
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Interpret a probability vector
    pub fn from_probabilities<const S: u32>(probabilities: &Scores<Fixed<S>>) -> Self {
        let class = probabilities.argmax().unwrap_or(0);
        let probabilities: Vec<f32> = probabilities.dequantize().into_vec();
        Self {
            class,
            confidence: probabilities.get(class).copied().unwrap_or(0.0),
            probabilities,
        }
    }
}

/// Quantized LeNet-5 ready for inference
#[derive(Debug, Clone)]
pub struct LeNet<const S: u32> {
    params: FixedParams<S>,
    report: QuantizationReport,
}

impl<const S: u32> LeNet<S> {
    /// Wrap already-quantized parameters
    pub fn new(params: FixedParams<S>) -> Self {
        Self {
            params,
            report: QuantizationReport::default(),
        }
    }

    /// Quantize trained float parameters
    pub fn from_float(params: &FloatParams) -> Self {
        let (params, report) = params.quantize_with_report::<S>();
        info!(
            scale = S,
            elements = report.elements,
            max_abs_error = report.max_abs_error,
            "Quantized parameters"
        );
        if report.saturated > 0 {
            warn!(
                saturated = report.saturated,
                "Parameters outside the Q{} range were clamped", S
            );
        }
        Self { params, report }
    }

    pub fn params(&self) -> &FixedParams<S> {
        &self.params
    }

    /// Report from [`LeNet::from_float`]; empty for [`LeNet::new`]
    pub fn quantization_report(&self) -> &QuantizationReport {
        &self.report
    }

    pub fn forward(&self, input: &Image<Fixed<S>>) -> Scores<Fixed<S>> {
        forward(input, &self.params)
    }

    pub fn logits(&self, input: &Image<Fixed<S>>) -> Scores<Fixed<S>> {
        logits(input, &self.params)
    }

    pub fn forward_traced(&self, input: &Image<Fixed<S>>) -> LayerOutputs<Fixed<S>> {
        let outputs = forward_traced(input, &self.params);
        debug!(
            conv1_max = max_raw(outputs.conv1.as_slice()),
            conv2_max = max_raw(outputs.conv2.as_slice()),
            fc1_max = max_raw(outputs.fc1.as_slice()),
            "Traced forward pass"
        );
        outputs
    }

    /// Quantize a float image and classify it
    pub fn predict(&self, image: &Image<f32>) -> Prediction {
        Prediction::from_probabilities(&self.forward(&image.quantize::<S>()))
    }
}

fn max_raw<const S: u32>(values: &[Fixed<S>]) -> i32 {
    values.iter().map(|v| v.raw()).max().unwrap_or(0)
}
