//! Fully-connected layer
//!
//! `out[n] = act(bias[n] + Σ_i weight[n][i] · in[i])`, one accumulator per
//! output unit, rounded once.

use qlenet_fixed_point::{Accumulator, Fixed, Matrix, Vector};

/// Activation applied after the dense reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// max(x, 0)
    Relu,
    /// Raw scores (the layer feeding softmax)
    Identity,
}

impl Activation {
    pub fn apply<const S: u32>(self, x: Fixed<S>) -> Fixed<S> {
        match self {
            Activation::Relu => x.relu(),
            Activation::Identity => x,
        }
    }
}

/// Dense layer with one weight row per output unit.
///
/// A feature map must be flattened with `Tensor3::flatten` first; its
/// channel-major order is the layout the weight rows were stored in.
pub fn fully_connected<const S: u32, const IN: usize, const OUT: usize>(
    input: &Vector<Fixed<S>, IN>,
    weight: &Matrix<Fixed<S>, OUT, IN>,
    bias: &Vector<Fixed<S>, OUT>,
    activation: Activation,
) -> Vector<Fixed<S>, OUT> {
    Vector::from_fn(|[n]| {
        let mut acc = Accumulator::with_bias(bias[n]);
        acc.mac_slice(input.as_slice(), weight.row(n));
        activation.apply(acc.finish())
    })
}
