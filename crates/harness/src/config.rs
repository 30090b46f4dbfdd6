//! Evaluation configuration

use std::path::PathBuf;

use qlenet_model::Normalization;

use crate::error::{HarnessError, Result};

/// Evaluation run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    /// Trained weights; random weights are used when unset
    pub weights: Option<PathBuf>,

    /// Directory holding the MNIST IDX test files
    pub mnist_dir: PathBuf,

    /// Evaluate only the first `limit` images
    pub limit: Option<usize>,

    /// Worker threads; `None` uses every core
    pub threads: Option<usize>,

    /// Pixel scaling
    pub normalization: Normalization,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            weights: None,
            mnist_dir: PathBuf::from("mnist"),
            limit: None,
            threads: None,
            normalization: Normalization::UnitRange,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| HarnessError::Config(format!("{}: invalid value '{}'", name, value)))
}

impl EvalConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Weights, data directory and normalization only, for commands that
    /// classify single images and never read `QLENET_LIMIT` or `QLENET_THREADS`
    pub fn inputs_from_env() -> Result<Self> {
        Self::inputs_from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EvalConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::inputs_from_lookup(&lookup)?;

        if let Some(limit) = lookup("QLENET_LIMIT") {
            config.limit = Some(parse_var("QLENET_LIMIT", &limit)?);
        }

        if let Some(threads) = lookup("QLENET_THREADS") {
            config.threads = Some(parse_var("QLENET_THREADS", &threads)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Same as [`EvalConfig::inputs_from_env`] over an arbitrary variable source
    pub fn inputs_from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("QLENET_WEIGHTS") {
            config.weights = Some(PathBuf::from(path));
        }

        if let Some(dir) = lookup("QLENET_MNIST_DIR") {
            config.mnist_dir = PathBuf::from(dir);
        }

        if let Some(norm) = lookup("QLENET_NORMALIZE") {
            config.normalization = norm.parse()?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(HarnessError::Config("thread count must be positive".to_string()));
        }
        Ok(())
    }
}
