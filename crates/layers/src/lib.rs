//! QLeNet Layers
//!
//! Fixed-point layer kernels for the LeNet pipeline. Every kernel is a pure
//! function of borrowed tensors; shapes are const generics, so wiring a layer
//! to the wrong producer is a compile error rather than an out-of-bounds read.

mod conv;
mod linear;
mod pool;
mod softmax;

pub use conv::conv2d_relu;
pub use linear::{fully_connected, Activation};
pub use pool::max_pool2x2;
pub use softmax::{softmax, softmax_f32};
