//! End-to-end integration tests: dataset discovery, a short training run,
//! checkpointing, and reconstruction video rendering, all on a synthetic
//! on-disk capture session.
//!
//! The window and batch sizes are tiny so the whole loop stays fast on CPU;
//! the decoder itself is full-size, so these tests exercise the real model.

use image::{Rgb, RgbImage};
use std::io::Write;
use std::path::Path;
use tch::Device;
use wificam_vae::config::{CheckpointPolicy, TrainingConfig};
use wificam_vae::csi::MIN_PAYLOAD_LEN;
use wificam_vae::dataset::{CsiImageDataset, WificamDataset};
use wificam_vae::error::TrainError;
use wificam_vae::eval::write_reconstruction_video;
use wificam_vae::model::{Vae, VaeHyperParams};
use wificam_vae::trainer::Trainer;

fn write_session(dir: &Path, num_rows: usize, image_ids: &[i64]) {
    std::fs::create_dir_all(dir).unwrap();

    let payload = serde_json::to_string(&vec![0.5_f64; MIN_PAYLOAD_LEN]).unwrap();
    let mut csv = std::fs::File::create(dir.join("csi.csv")).unwrap();
    writeln!(csv, "id,data").unwrap();
    for id in 0..num_rows as i64 {
        writeln!(csv, "{id},\"{payload}\"").unwrap();
    }

    for &id in image_ids {
        let img = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        img.save(dir.join(format!("{id}.png"))).unwrap();
    }
}

fn tiny_config(checkpoint_dir: &Path) -> TrainingConfig {
    let mut cfg = TrainingConfig::default();
    cfg.window_size = 4;
    cfg.z_dim = 8;
    cfg.batch_size = 2;
    cfg.num_epochs = 1;
    cfg.num_workers = 1;
    cfg.checkpoint_dir = checkpoint_dir.to_path_buf();
    cfg.checkpoint_policy = CheckpointPolicy::BestOnly;
    cfg
}

/// One epoch over a small session trains, validates, and writes the best
/// checkpoint; the reconstruction video then renders from the same model.
#[test]
fn fit_then_render_video_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_session(&data_root.join("s1"), 24, &[0, 12, 23]);

    let cfg = tiny_config(&tmp.path().join("ckpt"));
    let dataset = WificamDataset::discover(&data_root, &cfg).unwrap();
    assert_eq!(dataset.len(), 20);

    let model = Vae::new(VaeHyperParams::from_config(&cfg), Device::Cpu);
    let report = Trainer::new(cfg.clone()).fit(&model, &dataset).unwrap();

    assert_eq!(report.epochs.len(), 1);
    let stats = &report.epochs[0];
    assert!(stats.train.total.is_finite());
    assert!(stats.val.is_some(), "validation split should form one batch");
    assert_eq!(report.best_epoch, Some(0));

    let best = cfg.checkpoint_dir.join("best.ot");
    assert!(best.exists(), "BestOnly policy must write best.ot");
    assert!(best.with_extension("json").exists());

    // Every 5th of 20 samples -> 4 video frames.
    let video = tmp.path().join("preview.avi");
    let frames =
        write_reconstruction_video(&model, &dataset, cfg.eval_batch_size(), &video, 10, 5)
            .unwrap();
    assert_eq!(frames, 4);

    let bytes = std::fs::read(&video).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"AVI ");
}

/// A dataset whose sessions are all shorter than the window yields zero
/// samples and training refuses to start.
#[test]
fn fit_rejects_empty_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_session(&data_root.join("s1"), 3, &[0]);

    let cfg = tiny_config(&tmp.path().join("ckpt"));
    let dataset = WificamDataset::discover(&data_root, &cfg).unwrap();
    assert!(dataset.is_empty());

    let model = Vae::new(VaeHyperParams::from_config(&cfg), Device::Cpu);
    let err = Trainer::new(cfg).fit(&model, &dataset).unwrap_err();
    assert!(matches!(err, TrainError::EmptyDataset));
}

/// A training split smaller than one batch is rejected with a clear error
/// rather than silently doing nothing.
#[test]
fn fit_rejects_unbatchable_split() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    // 6 rows at window 4 -> 2 samples; train split of 1 cannot fill batch 2.
    write_session(&data_root.join("s1"), 6, &[0, 5]);

    let cfg = tiny_config(&tmp.path().join("ckpt"));
    let dataset = WificamDataset::discover(&data_root, &cfg).unwrap();
    assert_eq!(dataset.len(), 2);

    let model = Vae::new(VaeHyperParams::from_config(&cfg), Device::Cpu);
    let err = Trainer::new(cfg).fit(&model, &dataset).unwrap_err();
    assert!(matches!(err, TrainError::NoBatches(_)));
}
