use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the fold benchmarking and gene evaluation pipelines.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required key is absent from a parameters or manifest file.
    #[error("Must specify {key} in {path}")]
    MissingParameter { key: String, path: PathBuf },

    /// A required environment variable is not set.
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    /// A command-line value could not be interpreted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Option values that are individually valid but conflict.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Zip(#[from] npyz::zip::result::ZipError),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Plotting error: {0}")]
    Plot(String),

    /// Array member with a dtype or layout this crate does not handle.
    #[error("Array '{key}' in {path}: {reason}")]
    Npy {
        key: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Array '{key}' not found in {path}")]
    MissingKey { key: String, path: PathBuf },

    #[error("Array '{key}' already written to {path}")]
    DuplicateKey { key: String, path: PathBuf },

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Nothing to process: {0}")]
    EmptyInput(String),

    /// An external tool or scheduler command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    /// Scheduler output could not be understood.
    #[error("Job submission failed: {0}")]
    Submission(String),
}

impl PipelineError {
    pub fn missing_parameter(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingParameter {
            key: key.into(),
            path: path.into(),
        }
    }

    pub fn npy(key: impl Into<String>, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Npy {
            key: key.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Text the binaries log before exiting with status 1.
    pub fn exit_message(&self) -> String {
        match self {
            Self::MissingParameter { key, .. } if key == "num_targets" => {
                "Must specify number of targets (num_targets) in the parameters file".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for errors the binaries report as configuration problems.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. }
                | Self::MissingEnv(_)
                | Self::InvalidArgument(_)
                | Self::Config(_)
        )
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(e: ndarray::ShapeError) -> Self {
        PipelineError::Shape(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
