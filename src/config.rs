//! Training configuration for the CSI-to-image VAE.
//!
//! [`TrainingConfig`] is the single source of truth for all hyper-parameters,
//! dataset shapes, loss weights, and infrastructure settings used throughout
//! the pipeline. It is serializable via [`serde`] so it can be stored to /
//! restored from JSON files.
//!
//! # Example
//!
//! ```rust
//! use wificam_vae::config::TrainingConfig;
//!
//! let cfg = TrainingConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.window_size, 151);
//! assert_eq!(cfg.z_dim, 128);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::csi::NUM_SUBCARRIERS;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What to do when a session directory contains CSI rows but no images.
///
/// The nearest-image search has no candidates in that case, so the session
/// cannot contribute aligned samples either way; the policy only decides
/// whether the whole dataset build aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySessionPolicy {
    /// Skip the session and log a warning. Tolerates partially-captured
    /// sessions. This is the default.
    Skip,
    /// Abort the dataset build with an error naming the session.
    Fail,
}

/// When the trainer writes a checkpoint to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Save a checkpoint after every epoch; the filename embeds the epoch
    /// number and validation loss.
    EveryEpoch,
    /// Save only when the validation loss improves on the best seen so far.
    BestOnly,
}

// ---------------------------------------------------------------------------
// TrainingConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a training run.
///
/// All fields have documented defaults matching the reference capture setup.
/// Use [`TrainingConfig::default()`] as a starting point, then override
/// individual fields as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    // -----------------------------------------------------------------------
    // Data / Signal
    // -----------------------------------------------------------------------
    /// Length of the sliding CSI window in samples. Default: **151**.
    pub window_size: usize,

    /// Number of valid subcarrier amplitudes per CSI sample.
    ///
    /// Default: [`NUM_SUBCARRIERS`] (52, the two guard-band-excluded bands).
    pub num_subcarriers: usize,

    /// Fraction of the dataset held out for validation, taken as a
    /// contiguous tail split (no shuffle). Default: **0.3**.
    pub val_fraction: f64,

    /// Policy for sessions that contain no image files. Default:
    /// [`EmptySessionPolicy::Skip`].
    pub empty_session_policy: EmptySessionPolicy,

    // -----------------------------------------------------------------------
    // Model
    // -----------------------------------------------------------------------
    /// Dimensionality of the latent Gaussian. Default: **128**.
    pub z_dim: usize,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Mini-batch size for training; validation uses twice this. Default: **32**.
    pub batch_size: usize,

    /// Total number of training epochs. Default: **10**.
    pub num_epochs: usize,

    /// Initial learning rate for the AdamW optimiser. Default: **1e-3**.
    pub learning_rate: f64,

    /// L2 weight-decay regularisation coefficient. Default: **1e-4**.
    pub weight_decay: f64,

    /// Weight of the KL divergence term in the total loss. Default: **1.0**.
    pub beta: f64,

    /// Maximum gradient L2 norm for gradient clipping. Default: **1.0**.
    pub grad_clip_norm: f64,

    /// Horizon (in epochs) of the cosine learning-rate decay. Default: **100**.
    pub lr_t_max: usize,

    // -----------------------------------------------------------------------
    // Checkpointing
    // -----------------------------------------------------------------------
    /// Directory where checkpoints are written.
    pub checkpoint_dir: PathBuf,

    /// When checkpoints are written. Default: [`CheckpointPolicy::EveryEpoch`].
    pub checkpoint_policy: CheckpointPolicy,

    // -----------------------------------------------------------------------
    // Infrastructure
    // -----------------------------------------------------------------------
    /// Number of worker threads used to load batch samples in parallel.
    /// Default: **2**.
    pub num_workers: usize,

    /// Use a CUDA GPU when available. Default: **false**.
    pub use_gpu: bool,

    /// Seed for the deterministic batch shuffler and parameter
    /// initialisation. Default: **42**.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            // Data
            window_size: 151,
            num_subcarriers: NUM_SUBCARRIERS,
            val_fraction: 0.3,
            empty_session_policy: EmptySessionPolicy::Skip,
            // Model
            z_dim: 128,
            // Optimisation
            batch_size: 32,
            num_epochs: 10,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            beta: 1.0,
            grad_clip_norm: 1.0,
            lr_t_max: 100,
            // Checkpointing
            checkpoint_dir: PathBuf::from("outputs"),
            checkpoint_policy: CheckpointPolicy::EveryEpoch,
            // Infrastructure
            num_workers: 2,
            use_gpu: false,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Load a [`TrainingConfig`] from a JSON file at `path`.
    ///
    /// The loaded configuration is validated before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileAccess`] if the file cannot be opened,
    /// [`ConfigError::Parse`] if the JSON is malformed, and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: TrainingConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON at `path`,
    /// creating parent directories if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileAccess`] if the directory cannot be
    /// created or the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileAccess {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid_value("window_size", "must be > 0"));
        }
        if self.num_subcarriers == 0 {
            return Err(ConfigError::invalid_value("num_subcarriers", "must be > 0"));
        }
        if self.val_fraction <= 0.0 || self.val_fraction >= 1.0 {
            return Err(ConfigError::invalid_value(
                "val_fraction",
                "must be in (0.0, 1.0)",
            ));
        }
        if self.z_dim == 0 {
            return Err(ConfigError::invalid_value("z_dim", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "must be > 0"));
        }
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::invalid_value("learning_rate", "must be > 0.0"));
        }
        if self.weight_decay < 0.0 {
            return Err(ConfigError::invalid_value("weight_decay", "must be >= 0.0"));
        }
        if self.beta < 0.0 {
            return Err(ConfigError::invalid_value("beta", "must be >= 0.0"));
        }
        if self.grad_clip_norm <= 0.0 {
            return Err(ConfigError::invalid_value("grad_clip_norm", "must be > 0.0"));
        }
        if self.lr_t_max == 0 {
            return Err(ConfigError::invalid_value("lr_t_max", "must be > 0"));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::invalid_value("num_workers", "must be > 0"));
        }
        Ok(())
    }

    /// The batch size used for validation and evaluation passes.
    pub fn eval_batch_size(&self) -> usize {
        self.batch_size * 2
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
