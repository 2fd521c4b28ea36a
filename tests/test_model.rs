//! Integration tests for [`wificam_vae::model`] and
//! [`wificam_vae::checkpoint`].
//!
//! These use a deliberately small window and latent width; the decoder's
//! spatial pyramid is fixed, so reconstructions are always 128x128.

use tch::{Device, Kind, Tensor};
use wificam_vae::checkpoint;
use wificam_vae::error::CheckpointError;
use wificam_vae::model::{ForwardMode, Vae, VaeHyperParams};

fn tiny_hparams() -> VaeHyperParams {
    VaeHyperParams {
        window_size: 6,
        num_subcarriers: 52,
        z_dim: 8,
        learning_rate: 1e-3,
        beta: 1.0,
    }
}

fn random_csi(batch: i64, hparams: &VaeHyperParams) -> Tensor {
    Tensor::rand(
        [batch, hparams.window_size as i64, hparams.num_subcarriers as i64],
        (Kind::Float, Device::Cpu),
    )
}

// ---------------------------------------------------------------------------
// Forward pass
// ---------------------------------------------------------------------------

/// Train-mode latents are sampled; two passes over the same input decode
/// different codes, while eval mode is deterministic.
#[test]
fn train_mode_samples_eval_mode_does_not() {
    tch::manual_seed(0);
    let model = Vae::new(tiny_hparams(), Device::Cpu);
    let csi = random_csi(2, model.hparams());

    let _guard = tch::no_grad_guard();
    let a = model.forward(&csi, ForwardMode::Train);
    let b = model.forward(&csi, ForwardMode::Train);
    let z_diff = (&a.z - &b.z).abs().max().double_value(&[]);
    assert!(z_diff > 0.0, "train-mode latents must be stochastic");

    let c = model.forward(&csi, ForwardMode::Eval);
    let d = model.forward(&csi, ForwardMode::Eval);
    let recon_diff = (&c.recon - &d.recon).abs().max().double_value(&[]);
    assert_eq!(recon_diff, 0.0, "eval-mode forward must be deterministic");
}

/// The same architecture constructed twice with different seeds differs,
/// confirming weights are actually randomly initialised.
#[test]
fn fresh_models_have_different_weights() {
    tch::manual_seed(1);
    let a = Vae::new(tiny_hparams(), Device::Cpu);
    tch::manual_seed(2);
    let b = Vae::new(tiny_hparams(), Device::Cpu);

    let csi = random_csi(1, a.hparams());
    let ra = a.reconstruct(&csi);
    let rb = b.reconstruct(&csi);
    let diff = (&ra - &rb).abs().max().double_value(&[]);
    assert!(diff > 0.0);
}

// ---------------------------------------------------------------------------
// Checkpoint round trip
// ---------------------------------------------------------------------------

/// Saving and restoring preserves behaviour exactly.
#[test]
fn checkpoint_round_trip_preserves_outputs() {
    tch::manual_seed(3);
    let model = Vae::new(tiny_hparams(), Device::Cpu);
    let csi = random_csi(2, model.hparams());
    let before = model.reconstruct(&csi);

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("model.ot");
    checkpoint::save(&model, &path).unwrap();
    assert!(path.exists());
    assert!(path.with_extension("json").exists(), "sidecar must be written");

    let restored = checkpoint::load(&path, &tiny_hparams(), Device::Cpu).unwrap();
    let after = restored.reconstruct(&csi);
    let diff = (&before - &after).abs().max().double_value(&[]);
    assert_eq!(diff, 0.0, "restored model must reproduce outputs exactly");
}

/// A latent-width mismatch is rejected before weights are touched.
#[test]
fn checkpoint_rejects_mismatched_z_dim() {
    tch::manual_seed(4);
    let model = Vae::new(tiny_hparams(), Device::Cpu);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("model.ot");
    checkpoint::save(&model, &path).unwrap();

    let mut expected = tiny_hparams();
    expected.z_dim = 16;
    let err = checkpoint::load(&path, &expected, Device::Cpu).unwrap_err();
    match err {
        CheckpointError::HyperparamMismatch { field, .. } => assert_eq!(field, "z_dim"),
        other => panic!("expected HyperparamMismatch, got {other}"),
    }
}

/// A window-size mismatch is also structural and rejected.
#[test]
fn checkpoint_rejects_mismatched_window() {
    tch::manual_seed(5);
    let model = Vae::new(tiny_hparams(), Device::Cpu);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("model.ot");
    checkpoint::save(&model, &path).unwrap();

    let mut expected = tiny_hparams();
    expected.window_size = 12;
    let err = checkpoint::load(&path, &expected, Device::Cpu).unwrap_err();
    assert!(matches!(err, CheckpointError::HyperparamMismatch { field: "window_size", .. }));
}

/// Loading without the sidecar fails with a metadata error.
#[test]
fn checkpoint_without_sidecar_fails() {
    tch::manual_seed(6);
    let model = Vae::new(tiny_hparams(), Device::Cpu);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("model.ot");
    checkpoint::save(&model, &path).unwrap();
    std::fs::remove_file(path.with_extension("json")).unwrap();

    let err = checkpoint::load(&path, &tiny_hparams(), Device::Cpu).unwrap_err();
    assert!(matches!(err, CheckpointError::MetaRead { .. }));
}
