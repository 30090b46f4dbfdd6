//! QLeNet Fixed-Point Encoding
//!
//! Saturating fixed-point scalars for quantized neural network inference.
//! Values are i32 with a compile-time scaling factor 2^S; tensors carry their
//! shape in the type so layer wiring is checked by the compiler.

mod accumulator;
mod error;
mod fixed;
mod tensor;

pub use accumulator::Accumulator;
pub use error::{FixedPointError, Result};
pub use fixed::{
    round_div, round_shift, saturate, Fixed, Fixed10, Fixed16, Fixed8, DEFAULT_SCALE, EXP_DOMAIN,
    MAX_SCALE,
};
pub use tensor::{Matrix, QuantizationReport, Tensor3, Tensor4, Vector};
