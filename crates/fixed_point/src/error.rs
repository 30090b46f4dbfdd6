//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixedPointError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid shape: expected {expected} elements, got {got}")]
    InvalidShape { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
