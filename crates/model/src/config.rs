//! LeNet-5 topology
//!
//! The network shape is fixed at compile time: every dimension below is a
//! const, and the tensor aliases carry them into the type system so each
//! layer only accepts its producer's output.

use qlenet_fixed_point::{Matrix, Tensor3, Tensor4, Vector};
use serde::Serialize;

pub const IMG_DEPTH: usize = 1;
pub const IMG_HEIGHT: usize = 28;
pub const IMG_WIDTH: usize = 28;

pub const CONV1_DIM: usize = 5;
pub const CONV1_OUT: usize = 20;
pub const CONV1_HEIGHT: usize = IMG_HEIGHT - CONV1_DIM + 1;
pub const CONV1_WIDTH: usize = IMG_WIDTH - CONV1_DIM + 1;

pub const POOL1_HEIGHT: usize = CONV1_HEIGHT / 2;
pub const POOL1_WIDTH: usize = CONV1_WIDTH / 2;

pub const CONV2_DIM: usize = 5;
pub const CONV2_OUT: usize = 40;
pub const CONV2_HEIGHT: usize = POOL1_HEIGHT - CONV2_DIM + 1;
pub const CONV2_WIDTH: usize = POOL1_WIDTH - CONV2_DIM + 1;

pub const POOL2_HEIGHT: usize = CONV2_HEIGHT / 2;
pub const POOL2_WIDTH: usize = CONV2_WIDTH / 2;

/// Length of the flattened pool2 feature map
pub const FC1_IN: usize = CONV2_OUT * POOL2_HEIGHT * POOL2_WIDTH;
pub const FC1_OUT: usize = 400;
pub const FC2_OUT: usize = 10;

/// Digit classes 0-9
pub const NUM_CLASSES: usize = FC2_OUT;

/// Input image `[1, 28, 28]`
pub type Image<T> = Tensor3<T, IMG_DEPTH, IMG_HEIGHT, IMG_WIDTH>;
pub type Conv1Kernel<T> = Tensor4<T, CONV1_OUT, IMG_DEPTH, CONV1_DIM, CONV1_DIM>;
pub type Conv1Output<T> = Tensor3<T, CONV1_OUT, CONV1_HEIGHT, CONV1_WIDTH>;
pub type Pool1Output<T> = Tensor3<T, CONV1_OUT, POOL1_HEIGHT, POOL1_WIDTH>;
pub type Conv2Kernel<T> = Tensor4<T, CONV2_OUT, CONV1_OUT, CONV2_DIM, CONV2_DIM>;
pub type Conv2Output<T> = Tensor3<T, CONV2_OUT, CONV2_HEIGHT, CONV2_WIDTH>;
pub type Pool2Output<T> = Tensor3<T, CONV2_OUT, POOL2_HEIGHT, POOL2_WIDTH>;
/// FC1 weights; column index is the channel-major flattening of pool2
pub type Fc1Weight<T> = Matrix<T, FC1_OUT, FC1_IN>;
pub type Fc1Output<T> = Vector<T, FC1_OUT>;
pub type Fc2Weight<T> = Matrix<T, FC2_OUT, FC1_OUT>;
/// Class scores or probabilities
pub type Scores<T> = Vector<T, NUM_CLASSES>;

/// One row of the topology table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSpec {
    pub name: &'static str,
    pub input: Vec<usize>,
    pub output: Vec<usize>,
    /// Weights plus biases
    pub parameters: usize,
}

/// Layer-by-layer description of the network
pub fn topology() -> Vec<LayerSpec> {
    vec![
        LayerSpec {
            name: "conv1",
            input: vec![IMG_DEPTH, IMG_HEIGHT, IMG_WIDTH],
            output: vec![CONV1_OUT, CONV1_HEIGHT, CONV1_WIDTH],
            parameters: CONV1_OUT * IMG_DEPTH * CONV1_DIM * CONV1_DIM + CONV1_OUT,
        },
        LayerSpec {
            name: "pool1",
            input: vec![CONV1_OUT, CONV1_HEIGHT, CONV1_WIDTH],
            output: vec![CONV1_OUT, POOL1_HEIGHT, POOL1_WIDTH],
            parameters: 0,
        },
        LayerSpec {
            name: "conv2",
            input: vec![CONV1_OUT, POOL1_HEIGHT, POOL1_WIDTH],
            output: vec![CONV2_OUT, CONV2_HEIGHT, CONV2_WIDTH],
            parameters: CONV2_OUT * CONV1_OUT * CONV2_DIM * CONV2_DIM + CONV2_OUT,
        },
        LayerSpec {
            name: "pool2",
            input: vec![CONV2_OUT, CONV2_HEIGHT, CONV2_WIDTH],
            output: vec![CONV2_OUT, POOL2_HEIGHT, POOL2_WIDTH],
            parameters: 0,
        },
        LayerSpec {
            name: "fc1",
            input: vec![FC1_IN],
            output: vec![FC1_OUT],
            parameters: FC1_OUT * FC1_IN + FC1_OUT,
        },
        LayerSpec {
            name: "fc2",
            input: vec![FC1_OUT],
            output: vec![FC2_OUT],
            parameters: FC2_OUT * FC1_OUT + FC2_OUT,
        },
        LayerSpec {
            name: "softmax",
            input: vec![FC2_OUT],
            output: vec![NUM_CLASSES],
            parameters: 0,
        },
    ]
}
