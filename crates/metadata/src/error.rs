use std::path::PathBuf;
use thiserror::Error;

/// Failures loading or validating a feed definition
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("cannot read feed file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid feed YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Validation(String),
    /// A `compute` entry failed validation; `index` is its position in the list
    #[error("invalid compute entry #{index}: {reason}")]
    Compute { index: usize, reason: String },
}
