//! QLeNet Integration Tests
//!
//! End-to-end checks of the quantized engine against the float reference,
//! from weight files on disk to evaluation reports.

use qlenet_fixed_point::{Fixed, Fixed16, Vector};
use qlenet_harness::{evaluate, evaluate_dataset, evaluate_sequential, reference, QLeNetPipeline};
use qlenet_model::{
    forward, image_from_pixels, load_pgm, load_weights, save_weights, write_pgm, FloatParams,
    Image, LeNet, MnistDataset, Normalization, Sample, NUM_CLASSES,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_image(rng: &mut ChaCha8Rng) -> Image<f32> {
    // Sparse strokes on a dark background, like MNIST digits
    Image::from_fn(|_| if rng.gen_bool(0.2) { rng.gen_range(0.5..1.0) } else { 0.0 })
}

/// Random images labeled with the float reference's own prediction
fn synthetic_samples(params: &FloatParams, count: usize, seed: u64) -> Vec<Sample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|index| {
            let image = random_image(&mut rng);
            let label = reference::forward(&image, params).argmax().unwrap_or(0);
            Sample { index, image, label }
        })
        .collect()
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("qlenet-it-{}-{}", std::process::id(), name))
}

// =============================================================================
// Section 1: Forward Pass
// =============================================================================

mod forward_tests {
    use super::*;

    /// All-zero input and weights with FC2 bias [1, 0, ...] predicts class 0
    #[test]
    fn test_zero_network_predicts_biased_class() {
        let mut params = FloatParams::zeros();
        params.fc2_bias = Vector::from_fn(|[i]| if i == 0 { 1.0 } else { 0.0 });
        let fixed = params.quantize::<16>();

        let probs = forward(&Image::<Fixed16>::zeros(), &fixed);
        assert_eq!(probs.argmax(), Some(0));
        assert!(probs[0] > probs[1]);
        for i in 2..NUM_CLASSES {
            assert_eq!(probs[i], probs[1]);
        }
    }

    /// Probabilities are non-negative and sum to one within K ULPs
    #[test]
    fn test_probability_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(100);
        let net = LeNet::<16>::from_float(&FloatParams::random(&mut rng));

        for _ in 0..5 {
            let image = random_image(&mut rng).quantize::<16>();
            let probs = net.forward(&image);
            assert!(probs.iter().all(|p| p.raw() >= 0));
            let sum: i64 = probs.iter().map(|p| p.raw() as i64).sum();
            assert!((sum - Fixed16::ONE.raw() as i64).abs() <= NUM_CLASSES as i64, "sum {}", sum);
        }
    }

    /// Narrower formats still run end to end
    #[test]
    fn test_other_scales() {
        let mut rng = ChaCha8Rng::seed_from_u64(101);
        let params = FloatParams::random(&mut rng);
        let image = random_image(&mut rng);

        let q10 = LeNet::<10>::from_float(&params).predict(&image);
        let q16 = LeNet::<16>::from_float(&params).predict(&image);
        let sum: f32 = q10.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 0.02);
        assert_eq!(q16.probabilities.len(), q10.probabilities.len());
    }

    /// A saturated input still yields a valid distribution
    #[test]
    fn test_saturated_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(102);
        let net = LeNet::<16>::from_float(&FloatParams::random(&mut rng));
        let image = Image::filled(Fixed::<16>::MAX);

        let probs = net.forward(&image);
        assert!(probs.iter().all(|p| !p.is_negative()));
        assert!(probs.argmax().is_some());
    }
}

// =============================================================================
// Section 2: Fixed vs Float Agreement
// =============================================================================

mod agreement_tests {
    use super::*;

    /// Fixed-point argmax agrees with the float reference on at least 95% of
    /// a seeded synthetic labeled set
    #[test]
    fn test_argmax_agreement() {
        let mut rng = ChaCha8Rng::seed_from_u64(200);
        let params = FloatParams::random(&mut rng);
        let samples = synthetic_samples(&params, 60, 201);
        let pipeline = QLeNetPipeline::<16>::new(params);

        let report = evaluate(&pipeline, &samples);
        assert_eq!(report.total, 60);
        assert_eq!(report.float_correct, 60);
        assert!(report.agreement_rate() >= 0.95, "agreement {}", report.agreement_rate());
        assert!(report.fixed_accuracy() >= 0.95);
        assert!(report.max_prob_diff < 0.01, "max diff {}", report.max_prob_diff);
    }

    /// Parallel evaluation produces the same counts as sequential evaluation
    #[test]
    fn test_parallel_matches_sequential() {
        let mut rng = ChaCha8Rng::seed_from_u64(210);
        let params = FloatParams::random(&mut rng);
        let samples = synthetic_samples(&params, 24, 211);
        let pipeline = QLeNetPipeline::<16>::new(params);

        let parallel = evaluate(&pipeline, &samples);
        let sequential = evaluate_sequential(&pipeline, &samples);

        assert_eq!(parallel.total, sequential.total);
        assert_eq!(parallel.fixed_correct, sequential.fixed_correct);
        assert_eq!(parallel.float_correct, sequential.float_correct);
        assert_eq!(parallel.agreement, sequential.agreement);
        assert_eq!(parallel.confusion, sequential.confusion);
        assert_eq!(parallel.max_prob_diff, sequential.max_prob_diff);
        assert_eq!(parallel.mean_prob_diff, sequential.mean_prob_diff);

        for sample in &samples {
            assert_eq!(pipeline.run(&sample.image), pipeline.run(&sample.image));
        }
    }

    /// Evaluation over an IDX-backed dataset with an explicit thread count
    #[test]
    fn test_dataset_evaluation_with_pool() {
        let mut rng = ChaCha8Rng::seed_from_u64(220);
        let params = FloatParams::random(&mut rng);
        let pipeline = QLeNetPipeline::<16>::new(params);

        let images: Vec<Vec<u8>> = (0..8)
            .map(|_| (0..784).map(|_| rng.gen_range(0..=255)).collect())
            .collect();
        let labels: Vec<u8> = (0..8).map(|i| i as u8).collect();
        let dataset = MnistDataset::from_idx(images, labels, Normalization::UnitRange).unwrap();

        let report = evaluate_dataset(&pipeline, &dataset, Some(2)).unwrap();
        assert_eq!(report.total, 8);
        assert_eq!(report.threads, 2);
        let confusion_total: usize = report.confusion.iter().flatten().sum();
        assert_eq!(confusion_total, 8);
    }
}

// =============================================================================
// Section 3: Weight and Image Files
// =============================================================================

mod file_tests {
    use super::*;

    /// Weights saved in each writable format reload to the same predictions
    #[test]
    fn test_weight_files_preserve_predictions() {
        let mut rng = ChaCha8Rng::seed_from_u64(300);
        let params = FloatParams::random(&mut rng);
        let image = random_image(&mut rng);
        let expected = LeNet::<16>::from_float(&params).predict(&image);

        for name in ["weights.raw", "weights.safetensors"] {
            let path = temp_path(name);
            save_weights(&params, &path).unwrap();
            let loaded = load_weights(&path).unwrap();
            assert_eq!(LeNet::<16>::from_float(&loaded).predict(&image), expected, "{}", name);
            std::fs::remove_file(&path).ok();
        }
    }

    /// A PGM written to disk classifies like the in-memory image
    #[test]
    fn test_pgm_prediction() {
        let mut rng = ChaCha8Rng::seed_from_u64(310);
        let net = LeNet::<16>::from_float(&FloatParams::random(&mut rng));
        let pixels: Vec<u8> = (0..784).map(|_| rng.gen_range(0..=255)).collect();

        let path = temp_path("digit.pgm");
        write_pgm(std::fs::File::create(&path).unwrap(), &pixels, 28, 28).unwrap();
        let from_file = load_pgm(&path, Normalization::UnitRange).unwrap();
        std::fs::remove_file(&path).ok();

        let in_memory = image_from_pixels(&pixels, Normalization::UnitRange).unwrap();
        assert_eq!(net.predict(&from_file), net.predict(&in_memory));
    }
}
