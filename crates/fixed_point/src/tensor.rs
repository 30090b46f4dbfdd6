//! Const-shaped tensors
//!
//! Dense, row-major, heap-backed arrays whose dimensions are part of the
//! type. Element type is `f32` at the float boundary and [`Fixed`] inside the
//! quantized engine; `quantize` / `dequantize` convert between the two.

use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};
use crate::fixed::Fixed;

/// Summary of a float → fixed conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationReport {
    /// Number of converted elements
    pub elements: usize,
    /// Elements clamped to MIN/MAX
    pub saturated: usize,
    /// Largest |dequantize(quantize(v)) - v| over non-saturated elements
    pub max_abs_error: f64,
}

impl QuantizationReport {
    /// Quantize one value and account for it
    pub fn record<const S: u32>(&mut self, value: f32) -> Fixed<S> {
        let (q, saturated) = Fixed::<S>::overflowing_from_f64(value as f64);
        self.elements += 1;
        if saturated {
            self.saturated += 1;
        } else {
            self.max_abs_error = self.max_abs_error.max((q.to_f64() - value as f64).abs());
        }
        q
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: &QuantizationReport) {
        self.elements += other.elements;
        self.saturated += other.saturated;
        self.max_abs_error = self.max_abs_error.max(other.max_abs_error);
    }
}

#[inline]
fn ravel<const R: usize>(index: [usize; R], shape: [usize; R]) -> usize {
    let mut flat = 0;
    for (i, (&idx, &dim)) in index.iter().zip(shape.iter()).enumerate() {
        debug_assert!(idx < dim, "index {} out of bounds for axis {} of size {}", idx, i, dim);
        flat = flat * dim + idx;
    }
    flat
}

#[inline]
fn unravel<const R: usize>(mut flat: usize, shape: [usize; R]) -> [usize; R] {
    let mut index = [0; R];
    for axis in (0..R).rev() {
        index[axis] = flat % shape[axis];
        flat /= shape[axis];
    }
    index
}

macro_rules! shaped_tensor {
    ($(#[$meta:meta])* $name:ident, $rank:literal, [$($dim:ident),+]) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name<T, $(const $dim: usize),+> {
            data: Vec<T>,
        }

        impl<T, $(const $dim: usize),+> $name<T, $($dim),+> {
            /// Number of elements
            pub const LEN: usize = 1 $(* $dim)+;
            /// Dimensions, outermost first
            pub const SHAPE: [usize; $rank] = [$($dim),+];

            /// Wrap a row-major buffer, checking its length
            pub fn from_vec(data: Vec<T>) -> Result<Self> {
                if data.len() != Self::LEN {
                    return Err(FixedPointError::InvalidShape {
                        expected: Self::LEN,
                        got: data.len(),
                    });
                }
                Ok(Self { data })
            }

            /// Build element-wise from a multi-dimensional index
            pub fn from_fn(mut f: impl FnMut([usize; $rank]) -> T) -> Self {
                Self {
                    data: (0..Self::LEN).map(|i| f(unravel(i, Self::SHAPE))).collect(),
                }
            }

            /// Flat row-major position of a multi-dimensional index
            #[inline]
            pub fn offset(index: [usize; $rank]) -> usize {
                ravel(index, Self::SHAPE)
            }

            /// Bounds-checked element access
            pub fn get(&self, index: [usize; $rank]) -> Option<&T> {
                if index.iter().zip(Self::SHAPE).any(|(&i, dim)| i >= dim) {
                    return None;
                }
                self.data.get(Self::offset(index))
            }

            pub fn as_slice(&self) -> &[T] {
                &self.data
            }

            pub fn into_vec(self) -> Vec<T> {
                self.data
            }

            pub fn iter(&self) -> std::slice::Iter<'_, T> {
                self.data.iter()
            }

            pub const fn len(&self) -> usize {
                Self::LEN
            }

            pub const fn is_empty(&self) -> bool {
                Self::LEN == 0
            }

            /// Apply `f` to every element, keeping the shape
            pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> $name<U, $($dim),+> {
                $name {
                    data: self.data.iter().map(f).collect(),
                }
            }
        }

        impl<T: Clone + Default, $(const $dim: usize),+> $name<T, $($dim),+> {
            pub fn zeros() -> Self {
                Self {
                    data: vec![T::default(); Self::LEN],
                }
            }
        }

        impl<T: Clone, $(const $dim: usize),+> $name<T, $($dim),+> {
            pub fn filled(value: T) -> Self {
                Self {
                    data: vec![value; Self::LEN],
                }
            }
        }

        impl<T, $(const $dim: usize),+> Index<[usize; $rank]> for $name<T, $($dim),+> {
            type Output = T;

            #[inline]
            fn index(&self, index: [usize; $rank]) -> &T {
                &self.data[Self::offset(index)]
            }
        }

        impl<$(const $dim: usize),+> $name<f32, $($dim),+> {
            /// Convert to fixed point, saturating out-of-range values
            pub fn quantize<const S: u32>(&self) -> $name<Fixed<S>, $($dim),+> {
                self.map(|&v| Fixed::from_f32(v))
            }

            /// Convert to fixed point and report saturation and rounding error
            pub fn quantize_with_report<const S: u32>(
                &self,
            ) -> ($name<Fixed<S>, $($dim),+>, QuantizationReport) {
                let mut report = QuantizationReport::default();
                let quantized = self.map(|&v| report.record::<S>(v));
                (quantized, report)
            }
        }

        impl<const S: u32, $(const $dim: usize),+> $name<Fixed<S>, $($dim),+> {
            /// Convert back to f32
            pub fn dequantize(&self) -> $name<f32, $($dim),+> {
                self.map(|v| v.to_f32())
            }
        }
    };
}

shaped_tensor!(
    /// One-dimensional tensor (bias vectors, dense activations, scores)
    Vector, 1, [N]
);
shaped_tensor!(
    /// Row-major matrix `[R, C]` (dense weights, one row per output unit)
    Matrix, 2, [R, C]
);
shaped_tensor!(
    /// Feature map `[C, H, W]`
    Tensor3, 3, [C, H, W]
);
shaped_tensor!(
    /// Convolution kernel bank `[N, C, H, W]` (out-channels, in-channels, kh, kw)
    Tensor4, 4, [N, C, H, W]
);

impl<T, const N: usize> Index<usize> for Vector<T, N> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

impl<T: PartialOrd, const N: usize> Vector<T, N> {
    /// Index of the largest element; the first one wins ties
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, &T)> = None;
        for (i, v) in self.data.iter().enumerate() {
            match best {
                Some((_, b)) if !(v > b) => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| i)
    }
}

impl<T, const R: usize, const C: usize> Matrix<T, R, C> {
    /// Row `r` as a contiguous slice
    pub fn row(&self, r: usize) -> &[T] {
        &self.data[r * C..(r + 1) * C]
    }
}

impl<T, const C: usize, const H: usize, const W: usize> Tensor3<T, C, H, W> {
    /// Channel `c` as a contiguous `H * W` slice
    pub fn channel(&self, c: usize) -> &[T] {
        &self.data[c * H * W..(c + 1) * H * W]
    }

    /// Flatten channel-major, then row, then column.
    ///
    /// This ordering is the layout contract for dense weights that consume a
    /// feature map.
    pub fn flatten<const N: usize>(self) -> Vector<T, N> {
        const { assert!(N == C * H * W, "flatten length must equal C * H * W") };
        Vector { data: self.data }
    }
}

impl<T, const N: usize, const C: usize, const H: usize, const W: usize> Tensor4<T, N, C, H, W> {
    /// All `C * H * W` weights of output filter `n`
    pub fn filter(&self, n: usize) -> &[T] {
        let len = C * H * W;
        &self.data[n * len..(n + 1) * len]
    }
}
