//! Error types for the CSI-to-image VAE pipeline.
//!
//! This module is the single source of truth for all error types in the
//! crate. Every module that produces an error imports its error type from
//! here rather than defining it inline, keeping the error hierarchy
//! centralised and consistent.
//!
//! ## Hierarchy
//!
//! ```text
//! TrainError (top-level)
//! ├── ConfigError      (config validation / file loading)
//! ├── DatasetError     (CSI parsing, session alignment, image decode)
//! └── CheckpointError  (weight snapshot + hyperparameter sidecar)
//! ```

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// TrainResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type TrainResult<T> = Result<T, TrainError>;

// ---------------------------------------------------------------------------
// TrainError — top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for the training and evaluation pipeline.
///
/// Orchestration-level functions (e.g. [`crate::trainer::Trainer`] methods)
/// return `TrainResult<T>`. Lower-level functions in [`crate::config`],
/// [`crate::csi`] and [`crate::dataset`] return their own module-specific
/// error types which are coerced into `TrainError` via [`From`].
#[derive(Debug, Error)]
pub enum TrainError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A dataset loading or access error.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// A checkpoint could not be saved or loaded.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// An error raised by the tensor backend.
    #[error("Tensor backend error: {0}")]
    Tch(#[from] tch::TchError),

    /// A low-level I/O error without more specific context.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An image could not be encoded while composing output frames.
    #[error("Image encode error: {0}")]
    Image(#[from] image::ImageError),

    /// The dataset yielded zero usable windows and no training can be
    /// performed.
    #[error("Dataset is empty after windowing")]
    EmptyDataset,

    /// A split or loader configuration produced zero complete batches.
    #[error("No complete batches: {0}")]
    NoBatches(String),
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a
/// [`TrainingConfig`](crate::config::TrainingConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from or written to disk.
    #[error("Cannot access config file `{path}`: {source}")]
    FileAccess {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while discovering sessions, parsing CSI tables, or
/// loading aligned samples.
///
/// Data corruption is not transient: none of these errors is retried, and
/// the offending session or file is always named so the operator can
/// inspect it.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The dataset root directory does not exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound {
        /// The missing root path.
        path: PathBuf,
    },

    /// No session directory containing a `csi.csv` was found under the root.
    #[error("No capture sessions found under `{root}`")]
    NoSessions {
        /// Root that was scanned.
        root: PathBuf,
    },

    /// A session directory holds CSI rows but no image files, so the
    /// nearest-image search has no candidates.
    #[error("Session `{path}` contains no image files")]
    EmptySession {
        /// The offending session directory.
        path: PathBuf,
    },

    /// A CSI row payload is malformed or too short for valid-subcarrier
    /// extraction. This fails the whole session load; there is no
    /// per-sample recovery.
    #[error("Malformed CSI row id={row_id} in `{path}`: {message}")]
    MalformedRow {
        /// Path of the CSI table.
        path: PathBuf,
        /// `id` of the offending row.
        row_id: i64,
        /// Description of the problem.
        message: String,
    },

    /// The CSI table itself could not be parsed.
    #[error("Cannot parse CSI table `{path}`: {message}")]
    CsvParse {
        /// Path of the CSI table.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// An image file could not be decoded.
    #[error("Cannot decode image `{path}`: {source}")]
    ImageDecode {
        /// Path of the image file.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// A sample index is out of bounds.
    #[error("Index {idx} out of bounds (dataset has {len} samples)")]
    IndexOutOfBounds {
        /// The requested index.
        idx: usize,
        /// Total length of the dataset.
        len: usize,
    },

    /// A low-level I/O error while scanning or reading data files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatasetError {
    /// Construct a [`DatasetError::MalformedRow`].
    pub fn malformed_row<S: Into<String>>(
        path: impl Into<PathBuf>,
        row_id: i64,
        msg: S,
    ) -> Self {
        DatasetError::MalformedRow { path: path.into(), row_id, message: msg.into() }
    }

    /// Construct a [`DatasetError::CsvParse`].
    pub fn csv_parse<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        DatasetError::CsvParse { path: path.into(), message: msg.into() }
    }
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

/// Errors produced while saving or restoring a model checkpoint.
///
/// Loading never silently reshapes: a checkpoint whose hyperparameter
/// sidecar disagrees with the declared architecture fails before any
/// weight is touched.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The hyperparameter sidecar could not be read.
    #[error("Cannot read checkpoint metadata `{path}`: {source}")]
    MetaRead {
        /// Path of the sidecar file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The hyperparameter sidecar could not be written.
    #[error("Cannot write checkpoint metadata `{path}`: {source}")]
    MetaWrite {
        /// Path of the sidecar file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The hyperparameter sidecar contains malformed JSON.
    #[error("Malformed checkpoint metadata `{path}`: {source}")]
    MetaParse {
        /// Path of the sidecar file.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A saved hyperparameter disagrees with the declared architecture.
    #[error(
        "Checkpoint hyperparameter mismatch for `{field}`: checkpoint has \
         {saved}, model expects {expected}"
    )]
    HyperparamMismatch {
        /// Name of the mismatched hyperparameter.
        field: &'static str,
        /// Value recorded in the checkpoint.
        saved: String,
        /// Value required by the declared architecture.
        expected: String,
    },

    /// The weight file could not be saved or loaded.
    #[error("Cannot access weights at `{path}`: {source}")]
    Weights {
        /// Path of the weight file.
        path: PathBuf,
        /// Underlying backend error.
        #[source]
        source: tch::TchError,
    },
}

impl CheckpointError {
    /// Construct a [`CheckpointError::HyperparamMismatch`].
    pub fn mismatch(
        field: &'static str,
        saved: impl ToString,
        expected: impl ToString,
    ) -> Self {
        CheckpointError::HyperparamMismatch {
            field,
            saved: saved.to_string(),
            expected: expected.to_string(),
        }
    }
}
