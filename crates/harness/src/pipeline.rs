//! Fixed-point engine paired with its float reference

use qlenet_fixed_point::{Fixed, DEFAULT_SCALE};
use qlenet_model::{FloatParams, Image, LeNet, Prediction, Scores};
use serde::Serialize;
use tracing::debug;

use crate::reference;

/// Outcome of one image through both engines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub fixed: Prediction,
    pub reference: Prediction,
    /// Both engines chose the same class
    pub agree: bool,
    /// Largest per-class |p_fixed - p_float|
    pub max_prob_diff: f32,
}

/// Worst-case deviation of one layer's activations from the float reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDivergence {
    pub layer: &'static str,
    pub max_abs_error: f32,
    pub mean_abs_error: f32,
}

impl LayerDivergence {
    fn measure<const S: u32>(layer: &'static str, fixed: &[Fixed<S>], reference: &[f32]) -> Self {
        let mut max_abs_error = 0.0f32;
        let mut total = 0.0f64;
        for (q, &r) in fixed.iter().zip(reference) {
            let err = (q.to_f32() - r).abs();
            max_abs_error = max_abs_error.max(err);
            total += err as f64;
        }
        let mean_abs_error = if reference.is_empty() {
            0.0
        } else {
            (total / reference.len() as f64) as f32
        };
        Self {
            layer,
            max_abs_error,
            mean_abs_error,
        }
    }
}

fn reference_prediction(probabilities: &Scores<f32>) -> Prediction {
    let class = probabilities.argmax().unwrap_or(0);
    Prediction {
        class,
        confidence: probabilities[class],
        probabilities: probabilities.as_slice().to_vec(),
    }
}

/// Quantized network and the float parameters it was built from
#[derive(Debug, Clone)]
pub struct QLeNetPipeline<const S: u32 = DEFAULT_SCALE> {
    fixed: LeNet<S>,
    reference: FloatParams,
}

impl<const S: u32> QLeNetPipeline<S> {
    /// Quantize `params` for the fixed engine and keep them for the reference
    pub fn new(params: FloatParams) -> Self {
        Self {
            fixed: LeNet::from_float(&params),
            reference: params,
        }
    }

    pub fn fixed(&self) -> &LeNet<S> {
        &self.fixed
    }

    pub fn reference(&self) -> &FloatParams {
        &self.reference
    }

    /// Classify with both engines
    pub fn run(&self, image: &Image<f32>) -> InferenceResult {
        let fixed = self.fixed.predict(image);
        let reference = reference_prediction(&reference::forward(image, &self.reference));

        let max_prob_diff = fixed
            .probabilities
            .iter()
            .zip(&reference.probabilities)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);

        InferenceResult {
            agree: fixed.class == reference.class,
            fixed,
            reference,
            max_prob_diff,
        }
    }

    /// Per-layer activation error of the fixed engine
    pub fn compare_layers(&self, image: &Image<f32>) -> Vec<LayerDivergence> {
        let fixed = self.fixed.forward_traced(&image.quantize::<S>());
        let float = reference::forward_traced(image, &self.reference);

        let layers = vec![
            LayerDivergence::measure("conv1", fixed.conv1.as_slice(), float.conv1.as_slice()),
            LayerDivergence::measure("pool1", fixed.pool1.as_slice(), float.pool1.as_slice()),
            LayerDivergence::measure("conv2", fixed.conv2.as_slice(), float.conv2.as_slice()),
            LayerDivergence::measure("pool2", fixed.pool2.as_slice(), float.pool2.as_slice()),
            LayerDivergence::measure("fc1", fixed.fc1.as_slice(), float.fc1.as_slice()),
            LayerDivergence::measure("fc2", fixed.logits.as_slice(), float.logits.as_slice()),
            LayerDivergence::measure(
                "softmax",
                fixed.probabilities.as_slice(),
                float.probabilities.as_slice(),
            ),
        ];
        for l in &layers {
            debug!(layer = l.layer, max = l.max_abs_error, mean = l.mean_abs_error, "Layer divergence");
        }
        layers
    }
}
