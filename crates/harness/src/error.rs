//! Harness error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Model error: {0}")]
    Model(#[from] qlenet_model::ModelError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] qlenet_fixed_point::FixedPointError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
