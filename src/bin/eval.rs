//! `eval` binary — render a reconstruction preview video from a checkpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin eval -- --checkpoint outputs/best.ot --data-dir data
//! cargo run --bin eval -- --checkpoint outputs/best.ot --out preview.avi --stride 5
//! ```

use clap::Parser;
use std::path::PathBuf;
use tch::Device;
use tracing::{error, info};
use wificam_vae::config::TrainingConfig;
use wificam_vae::dataset::{CsiImageDataset, WificamDataset};
use wificam_vae::eval::{write_reconstruction_video, FRAME_STRIDE, VIDEO_FPS};
use wificam_vae::model::VaeHyperParams;
use wificam_vae::{checkpoint, TrainResult};

/// Command-line arguments for the evaluation binary.
#[derive(Parser, Debug)]
#[command(
    name = "eval",
    version,
    about = "Render ground-truth vs reconstruction comparison video",
    long_about = None
)]
struct Args {
    /// Path to the checkpoint weight file (`.ot`).
    #[arg(short = 'k', long, value_name = "FILE")]
    checkpoint: PathBuf,

    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory containing the capture sessions.
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Output video path.
    #[arg(short, long, value_name = "FILE", default_value = "reconstruction.avi")]
    out: PathBuf,

    /// Playback rate of the output video.
    #[arg(long, default_value_t = VIDEO_FPS)]
    fps: u32,

    /// Render every N-th aligned sample.
    #[arg(long, default_value_t = FRAME_STRIDE)]
    stride: usize,

    /// Run the model on CUDA when available.
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn run(args: Args) -> TrainResult<()> {
    let config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TrainingConfig::from_json(path)?
        }
        None => TrainingConfig::default(),
    };

    let dataset = WificamDataset::discover(&args.data_dir, &config)?;
    info!("Dataset: {} aligned samples", dataset.len());

    let device = if args.cuda { Device::cuda_if_available() } else { Device::Cpu };
    let expected = VaeHyperParams::from_config(&config);
    let model = checkpoint::load(&args.checkpoint, &expected, device)?;
    info!("Restored model with {} trainable parameters", model.num_parameters());

    let frames = write_reconstruction_video(
        &model,
        &dataset,
        config.eval_batch_size(),
        &args.out,
        args.fps,
        args.stride,
    )?;
    info!("Wrote {} frames to {}", frames, args.out.display());
    Ok(())
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

    info!("CSI-to-image VAE evaluation v{}", wificam_vae::VERSION);

    if let Err(e) = run(args) {
        error!("Evaluation failed: {e}");
        std::process::exit(1);
    }
}
