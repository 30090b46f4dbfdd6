//! Accuracy evaluation over labeled images
//!
//! Each image is independent, so samples are scored across a rayon pool
//! sharing the pipeline immutably. Results are folded in sample order, which
//! makes parallel and sequential runs produce identical reports.

use std::time::Instant;

use qlenet_model::{MnistDataset, Sample, NUM_CLASSES};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::pipeline::{InferenceResult, QLeNetPipeline};

/// Aggregate accuracy of the fixed and float engines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub total: usize,
    pub fixed_correct: usize,
    pub float_correct: usize,
    /// Images where both engines chose the same class
    pub agreement: usize,
    pub max_prob_diff: f32,
    pub mean_prob_diff: f32,
    /// `confusion[label][fixed_class]`
    pub confusion: [[usize; NUM_CLASSES]; NUM_CLASSES],
    pub elapsed_ms: u64,
    pub threads: usize,
}

impl EvaluationReport {
    fn ratio(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    }

    pub fn fixed_accuracy(&self) -> f64 {
        Self::ratio(self.fixed_correct, self.total)
    }

    pub fn float_accuracy(&self) -> f64 {
        Self::ratio(self.float_correct, self.total)
    }

    pub fn agreement_rate(&self) -> f64 {
        Self::ratio(self.agreement, self.total)
    }

    pub fn images_per_sec(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.total as f64 * 1000.0 / self.elapsed_ms as f64
        }
    }

    fn from_outcomes(outcomes: &[(usize, InferenceResult)], elapsed_ms: u64, threads: usize) -> Self {
        let mut report = Self {
            total: outcomes.len(),
            fixed_correct: 0,
            float_correct: 0,
            agreement: 0,
            max_prob_diff: 0.0,
            mean_prob_diff: 0.0,
            confusion: [[0; NUM_CLASSES]; NUM_CLASSES],
            elapsed_ms,
            threads,
        };

        let mut diff_sum = 0.0f64;
        for (label, result) in outcomes {
            report.fixed_correct += usize::from(result.fixed.class == *label);
            report.float_correct += usize::from(result.reference.class == *label);
            report.agreement += usize::from(result.agree);
            report.max_prob_diff = report.max_prob_diff.max(result.max_prob_diff);
            diff_sum += result.max_prob_diff as f64;
            if *label < NUM_CLASSES {
                report.confusion[*label][result.fixed.class] += 1;
            }
        }
        if !outcomes.is_empty() {
            report.mean_prob_diff = (diff_sum / outcomes.len() as f64) as f32;
        }
        report
    }
}

/// Score `samples` one after another on the calling thread
pub fn evaluate_sequential<const S: u32>(
    pipeline: &QLeNetPipeline<S>,
    samples: &[Sample],
) -> EvaluationReport {
    let start = Instant::now();
    let outcomes: Vec<(usize, InferenceResult)> = samples
        .iter()
        .map(|s| (s.label, pipeline.run(&s.image)))
        .collect();
    EvaluationReport::from_outcomes(&outcomes, start.elapsed().as_millis() as u64, 1)
}

/// Score `samples` across the current rayon pool
pub fn evaluate<const S: u32>(pipeline: &QLeNetPipeline<S>, samples: &[Sample]) -> EvaluationReport {
    let start = Instant::now();
    let outcomes: Vec<(usize, InferenceResult)> = samples
        .par_iter()
        .map(|s| (s.label, pipeline.run(&s.image)))
        .collect();
    let report = EvaluationReport::from_outcomes(
        &outcomes,
        start.elapsed().as_millis() as u64,
        rayon::current_num_threads(),
    );
    info!(
        total = report.total,
        fixed_accuracy = report.fixed_accuracy(),
        float_accuracy = report.float_accuracy(),
        agreement = report.agreement_rate(),
        elapsed_ms = report.elapsed_ms,
        "Evaluation finished"
    );
    report
}

/// Score a whole dataset, decoding images inside the workers.
///
/// `threads` of `None` uses rayon's default pool; `Some(0)` is rejected,
/// matching [`crate::EvalConfig::validate`].
pub fn evaluate_dataset<const S: u32>(
    pipeline: &QLeNetPipeline<S>,
    dataset: &MnistDataset,
    threads: Option<usize>,
) -> Result<EvaluationReport> {
    let run = || {
        let samples: Vec<Sample> = (0..dataset.len())
            .into_par_iter()
            .filter_map(|i| dataset.get(i))
            .collect();
        evaluate(pipeline, &samples)
    };

    match threads {
        Some(0) => Err(HarnessError::Config("thread count must be positive".to_string())),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| HarnessError::Config(format!("thread pool: {}", e)))?;
            Ok(pool.install(run))
        }
        None => Ok(run()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlenet_model::FloatParams;

    #[test]
    fn test_report_ratios() {
        let report = EvaluationReport::from_outcomes(&[], 0, 1);
        assert_eq!(report.total, 0);
        assert_eq!(report.fixed_accuracy(), 0.0);
        assert_eq!(report.images_per_sec(), 0.0);
    }

    #[test]
    fn test_zero_network_counts() {
        let mut params = FloatParams::zeros();
        params.fc2_bias = qlenet_model::Scores::from_fn(|[i]| if i == 4 { 1.0 } else { 0.0 });
        let pipeline = QLeNetPipeline::<16>::new(params);

        let samples: Vec<Sample> = (0..6)
            .map(|i| Sample {
                index: i,
                image: qlenet_model::Image::zeros(),
                label: if i < 2 { 4 } else { 7 },
            })
            .collect();

        let report = evaluate_sequential(&pipeline, &samples);
        assert_eq!(report.total, 6);
        assert_eq!(report.fixed_correct, 2);
        assert_eq!(report.float_correct, 2);
        assert_eq!(report.agreement, 6);
        assert_eq!(report.confusion[4][4], 2);
        assert_eq!(report.confusion[7][4], 4);
        assert!((report.fixed_accuracy() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_dataset_rejects_zero_threads() {
        let pipeline = QLeNetPipeline::<16>::new(FloatParams::zeros());
        let dataset = MnistDataset::from_idx(
            vec![vec![0; 784]],
            vec![0],
            qlenet_model::Normalization::UnitRange,
        )
        .unwrap();

        assert!(matches!(
            evaluate_dataset(&pipeline, &dataset, Some(0)),
            Err(HarnessError::Config(_))
        ));
        let report = evaluate_dataset(&pipeline, &dataset, None).unwrap();
        assert_eq!(report.total, 1);
    }
}
