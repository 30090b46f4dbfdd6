//! Convolution layer
//!
//! Valid (unpadded) stride-1 cross-correlation with bias and ReLU:
//!
//! ```text
//! out[f][y][x] = relu(bias[f] + Σ_c Σ_ky Σ_kx kernel[f][c][ky][kx] · in[c][y+ky][x+kx])
//! ```
//!
//! The sum runs in an [`Accumulator`] and is rounded once per output element.

use qlenet_fixed_point::{Accumulator, Fixed, Tensor3, Tensor4, Vector};

/// Convolve `input` with a bank of `COUT` square `K×K` filters.
///
/// `OH = H - K + 1` and `OW = W - K + 1` are checked at compile time.
pub fn conv2d_relu<
    const S: u32,
    const CIN: usize,
    const H: usize,
    const W: usize,
    const COUT: usize,
    const K: usize,
    const OH: usize,
    const OW: usize,
>(
    input: &Tensor3<Fixed<S>, CIN, H, W>,
    kernel: &Tensor4<Fixed<S>, COUT, CIN, K, K>,
    bias: &Vector<Fixed<S>, COUT>,
) -> Tensor3<Fixed<S>, COUT, OH, OW> {
    const {
        assert!(K >= 1 && K <= H && K <= W, "kernel must fit inside the input");
        assert!(OH == H - K + 1 && OW == W - K + 1, "output must be (H-K+1) x (W-K+1)");
    };

    Tensor3::from_fn(|[f, y, x]| {
        let filter = kernel.filter(f);
        let mut acc = Accumulator::with_bias(bias[f]);
        for c in 0..CIN {
            let plane = input.channel(c);
            for ky in 0..K {
                let start = (y + ky) * W + x;
                let taps = (c * K + ky) * K;
                acc.mac_slice(&plane[start..start + K], &filter[taps..taps + K]);
            }
        }
        acc.finish().relu()
    })
}
