//! QLeNet Model
//!
//! LeNet-5 topology, parameter sets and the fixed-point forward pass, plus
//! loaders for trained weights (raw, safetensors, Keras JSON) and input
//! data (MNIST IDX, PGM).

pub mod config;
mod dataset;
mod error;
mod loader;
mod network;
mod weights;

pub use config::{topology, Image, LayerSpec, Scores, NUM_CLASSES};
pub use dataset::{
    image_from_pixels, load_pgm, read_idx_images, read_idx_labels, read_pgm, write_pgm,
    MnistDataset, Normalization, Sample, TEST_IMAGES_FILE, TEST_LABELS_FILE,
};
pub use error::{ModelError, Result};
pub use loader::{
    from_keras_json, from_safetensors_bytes, load_keras_json, load_raw, load_safetensors,
    load_weights, read_raw, save_raw, save_safetensors, save_weights, to_safetensors_bytes,
    write_raw, WeightFormat,
};
pub use network::{forward, forward_traced, logits, LayerOutputs, LeNet, Prediction};
pub use weights::{
    tensor_shape, FixedParams, FloatParams, LeNetParams, TENSOR_NAMES, TENSOR_SHAPES,
};
