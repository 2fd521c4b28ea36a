//! Model checkpointing.
//!
//! A checkpoint is a pair of files: the weight snapshot written by the
//! tensor backend (`.ot`) and a JSON hyperparameter sidecar next to it
//! (same stem, `.json` extension). On restore the sidecar is read first
//! and every architecture-determining field is compared against the
//! expected hyperparameters; any disagreement aborts the load before a
//! single weight is touched, so a checkpoint can never be silently loaded
//! into a model of a different shape.

use std::path::{Path, PathBuf};
use tch::Device;
use tracing::info;

use crate::error::CheckpointError;
use crate::model::{Vae, VaeHyperParams};

/// Path of the hyperparameter sidecar for a weight file.
fn sidecar_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

/// Save `model`'s weights to `path` plus a hyperparameter sidecar.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`CheckpointError::Weights`] when the backend cannot write the
/// snapshot and [`CheckpointError::MetaWrite`] for sidecar IO failures.
pub fn save(model: &Vae, path: &Path) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CheckpointError::MetaWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    model
        .var_store()
        .save(path)
        .map_err(|source| CheckpointError::Weights { path: path.to_path_buf(), source })?;

    let meta = sidecar_path(path);
    let json = serde_json::to_string_pretty(model.hparams())
        .map_err(|source| CheckpointError::MetaParse { path: meta.clone(), source })?;
    std::fs::write(&meta, json)
        .map_err(|source| CheckpointError::MetaWrite { path: meta.clone(), source })?;

    info!("Saved checkpoint to {}", path.display());
    Ok(())
}

/// Restore a model from the checkpoint at `path`.
///
/// The sidecar's architecture fields must match `expected` exactly; the
/// optimisation-provenance fields (`learning_rate`, `beta`) are informative
/// and not enforced.
///
/// # Errors
///
/// - [`CheckpointError::MetaRead`] / [`CheckpointError::MetaParse`] for a
///   missing or malformed sidecar.
/// - [`CheckpointError::HyperparamMismatch`] naming the first field that
///   disagrees.
/// - [`CheckpointError::Weights`] when the snapshot cannot be loaded.
pub fn load(
    path: &Path,
    expected: &VaeHyperParams,
    device: Device,
) -> Result<Vae, CheckpointError> {
    let meta = sidecar_path(path);
    let contents = std::fs::read_to_string(&meta)
        .map_err(|source| CheckpointError::MetaRead { path: meta.clone(), source })?;
    let saved: VaeHyperParams = serde_json::from_str(&contents)
        .map_err(|source| CheckpointError::MetaParse { path: meta.clone(), source })?;

    if saved.window_size != expected.window_size {
        return Err(CheckpointError::mismatch(
            "window_size",
            saved.window_size,
            expected.window_size,
        ));
    }
    if saved.num_subcarriers != expected.num_subcarriers {
        return Err(CheckpointError::mismatch(
            "num_subcarriers",
            saved.num_subcarriers,
            expected.num_subcarriers,
        ));
    }
    if saved.z_dim != expected.z_dim {
        return Err(CheckpointError::mismatch("z_dim", saved.z_dim, expected.z_dim));
    }

    let mut model = Vae::new(saved, device);
    model
        .var_store_mut()
        .load(path)
        .map_err(|source| CheckpointError::Weights { path: path.to_path_buf(), source })?;

    info!("Restored checkpoint from {}", path.display());
    Ok(model)
}
