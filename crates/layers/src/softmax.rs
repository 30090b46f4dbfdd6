//! Softmax layer
//!
//! Max-subtracted exponentials normalized by their sum. The sum and every
//! division run on i64 raw values; narrowing happens once per probability.

use qlenet_fixed_point::{round_div, saturate, Fixed, Vector};

/// Probability vector over `K` classes in Q(S).
///
/// Invariant to adding a constant to every score (as long as the shifted
/// scores do not saturate), non-negative, and summing to one within `K/2`
/// ULPs. The largest score always contributes e^0 = 1, so the sum cannot be
/// zero for `K > 0`; should it ever be, a one-ULP denominator is substituted
/// rather than dividing by zero.
pub fn softmax<const S: u32, const K: usize>(scores: &Vector<Fixed<S>, K>) -> Vector<Fixed<S>, K> {
    let Some(&max) = scores.iter().max() else {
        return Vector::zeros();
    };

    let exps = scores.map(|&s| (s - max).exp_approx());
    let sum: i64 = exps.iter().map(|e| e.raw() as i64).sum();
    let denominator = if sum > 0 { sum } else { 1 };

    exps.map(|e| Fixed::from_raw(saturate(round_div((e.raw() as i64) << S, denominator))))
}

/// [`softmax`] dequantized for reporting
pub fn softmax_f32<const S: u32, const K: usize>(scores: &Vector<Fixed<S>, K>) -> Vector<f32, K> {
    softmax(scores).dequantize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlenet_fixed_point::Fixed16;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const ULP: f64 = 1.0 / 65536.0;

    fn scores(values: &[f64]) -> Vector<Fixed16, 10> {
        Vector::from_vec(values.iter().map(|&v| Fixed16::from_f64(v)).collect()).unwrap()
    }

    fn float_softmax(values: &[f64]) -> Vec<f64> {
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        exps.iter().map(|e| e / sum).collect()
    }

    #[test]
    fn test_sums_to_one_and_non_negative() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..200 {
            let values: Vec<f64> = (0..10).map(|_| rng.gen_range(-15.0..15.0)).collect();
            let probs = softmax(&scores(&values));
            assert!(probs.iter().all(|p| !p.is_negative()));
            let total: f64 = probs.iter().map(|p| p.to_f64()).sum();
            assert!((total - 1.0).abs() <= 1e-3, "sum = {}", total);
        }
    }

    #[test]
    fn test_matches_float_softmax() {
        let values = [1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 2.5, -3.0, 1.5, 0.25];
        let probs = softmax_f32(&scores(&values));
        for (p, e) in probs.iter().zip(float_softmax(&values)) {
            assert!((*p as f64 - e).abs() < 1e-3, "{} vs {}", p, e);
        }
    }

    #[test]
    fn test_shift_invariance() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        for _ in 0..100 {
            let values: Vec<f64> = (0..10).map(|_| rng.gen_range(-8.0..8.0)).collect();
            let shift = Fixed16::from_f64(rng.gen_range(-1000.0..1000.0));
            let original = scores(&values);
            let shifted = original.map(|&s| s + shift);

            let a = softmax(&original);
            let b = softmax(&shifted);
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x.to_f64() - y.to_f64()).abs() <= 4.0 * ULP);
            }
        }
    }

    #[test]
    fn test_argmax_is_preserved() {
        let values = [0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let probs = softmax(&scores(&values));
        assert_eq!(probs.argmax(), Some(3));
    }

    #[test]
    fn test_uniform_scores() {
        let probs = softmax(&scores(&[7.0; 10]));
        for p in probs.iter() {
            assert!((p.to_f64() - 0.1).abs() <= ULP);
        }
    }

    #[test]
    fn test_extreme_gap_clamps_exponent() {
        let values = [100.0, -100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let probs = softmax_f32(&scores(&values));
        assert!(probs[0] > 0.999);
        assert!(probs.iter().all(|&p| p >= 0.0));
    }
}
