//! Wide multiply-accumulate register
//!
//! Products of two Q(S) values are Q(2S); they are summed in an i64 without
//! any intermediate narrowing and rounded once in [`Accumulator::finish`].

use crate::fixed::{round_shift, saturate, Fixed};

/// Q(2S) running sum of fixed-point products
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulator<const S: u32> {
    acc: i64,
}

impl<const S: u32> Accumulator<S> {
    pub const fn new() -> Self {
        Self { acc: 0 }
    }

    /// Start from a bias, lifted to the product's fixed-point position
    pub fn with_bias(bias: Fixed<S>) -> Self {
        Self {
            acc: (bias.raw() as i64) << S,
        }
    }

    /// Add one full-precision product
    #[inline]
    pub fn mac(&mut self, a: Fixed<S>, b: Fixed<S>) {
        self.acc = self.acc.saturating_add(a.raw() as i64 * b.raw() as i64);
    }

    /// Add the dot product of two equally long slices
    #[inline]
    pub fn mac_slice(&mut self, a: &[Fixed<S>], b: &[Fixed<S>]) {
        debug_assert_eq!(a.len(), b.len());
        for (&x, &w) in a.iter().zip(b) {
            self.mac(x, w);
        }
    }

    /// Raw Q(2S) value
    pub const fn raw(self) -> i64 {
        self.acc
    }

    /// Round once and saturate back to Q(S)
    pub fn finish(self) -> Fixed<S> {
        Fixed::from_raw(saturate(round_shift(self.acc, S)))
    }
}
