//! QLeNet Test Harness
//!
//! Float reference implementation, fixed-vs-float comparison and parallel
//! accuracy evaluation for the quantized LeNet engine.

mod config;
mod error;
mod evaluate;
mod pipeline;
pub mod reference;

pub use config::EvalConfig;
pub use error::{HarnessError, Result};
pub use evaluate::{evaluate, evaluate_dataset, evaluate_sequential, EvaluationReport};
pub use pipeline::{InferenceResult, LayerDivergence, QLeNetPipeline};
