//! `train` binary — entry point for the CSI-to-image VAE training pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin train -- --data-dir data/captures
//! cargo run --bin train -- --config config.json --cuda
//! ```

use clap::Parser;
use std::path::PathBuf;
use tch::Device;
use tracing::{error, info};
use wificam_vae::config::TrainingConfig;
use wificam_vae::dataset::{CsiImageDataset, WificamDataset};
use wificam_vae::model::{Vae, VaeHyperParams};
use wificam_vae::trainer::Trainer;

/// Command-line arguments for the training binary.
#[derive(Parser, Debug)]
#[command(
    name = "train",
    version,
    about = "CSI-to-image VAE training pipeline",
    long_about = None
)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// If not provided, the default `TrainingConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory containing the capture sessions.
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Override the checkpoint directory from the config.
    #[arg(long, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Enable CUDA training (overrides config `use_gpu`).
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("CSI-to-image VAE training pipeline v{}", wificam_vae::VERSION);

    // Load or construct training configuration.
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match TrainingConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided — using defaults");
            TrainingConfig::default()
        }
    };

    // Apply CLI overrides.
    if let Some(dir) = args.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    if args.cuda {
        config.use_gpu = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    info!("Configuration validated successfully");
    info!("  window size  : {}", config.window_size);
    info!("  subcarriers  : {}", config.num_subcarriers);
    info!("  latent dim   : {}", config.z_dim);
    info!("  batch size   : {}", config.batch_size);
    info!("  learning rate: {}", config.learning_rate);
    info!("  epochs       : {}", config.num_epochs);
    info!("  device       : {}", if config.use_gpu { "GPU" } else { "CPU" });

    info!("Discovering capture sessions under {}", args.data_dir.display());
    let dataset = match WificamDataset::discover(&args.data_dir, &config) {
        Ok(ds) => ds,
        Err(e) => {
            error!("Failed to load dataset: {e}");
            error!(
                "Ensure capture sessions (csi.csv + numbered images) exist under {}",
                args.data_dir.display()
            );
            std::process::exit(1);
        }
    };
    if dataset.is_empty() {
        error!(
            "Dataset is empty — no aligned windows under {}",
            args.data_dir.display()
        );
        std::process::exit(1);
    }
    info!("Dataset: {} aligned samples", dataset.len());

    let device = if config.use_gpu { Device::cuda_if_available() } else { Device::Cpu };
    let model = Vae::new(VaeHyperParams::from_config(&config), device);
    info!("Model: {} trainable parameters", model.num_parameters());

    let trainer = Trainer::new(config);
    match trainer.fit(&model, &dataset) {
        Ok(report) => {
            match (report.best_val_loss, report.best_epoch) {
                (Some(loss), Some(epoch)) => {
                    info!("Training complete: best val loss {:.4} at epoch {}", loss, epoch + 1);
                }
                _ => info!("Training complete ({} epochs, no validation)", report.epochs.len()),
            }
        }
        Err(e) => {
            error!("Training failed: {e}");
            std::process::exit(1);
        }
    }
}
