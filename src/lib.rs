//! Windowed CSI-to-image variational autoencoder.
//!
//! This crate reconstructs camera frames from WiFi channel state
//! information. A sliding window of CSI amplitude samples is encoded by a
//! temporal transformer into a latent Gaussian, from which a convolutional
//! decoder reconstructs the camera frame captured closest in time to the
//! window's centre.
//!
//! ## Module hierarchy
//!
//! ```text
//! wificam_vae
//! ├── config       training configuration (JSON-backed, validated)
//! ├── error        centralised error hierarchy
//! ├── csi          raw capture table -> amplitude matrix
//! ├── dataset      session discovery, temporal-visual alignment, batching
//! ├── model        sequence encoder + image decoder VAE
//! ├── losses       reconstruction + KL objective
//! ├── checkpoint   weight snapshots with hyperparameter sidecars
//! ├── trainer      optimisation loop (AdamW, cosine LR, clipping)
//! ├── eval         side-by-side reconstruction previews
//! └── video        MJPEG-in-AVI container writer
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tch::Device;
//! use wificam_vae::config::TrainingConfig;
//! use wificam_vae::dataset::WificamDataset;
//! use wificam_vae::model::{Vae, VaeHyperParams};
//! use wificam_vae::trainer::Trainer;
//!
//! # fn main() -> wificam_vae::error::TrainResult<()> {
//! let config = TrainingConfig::default();
//! let dataset = WificamDataset::discover("data".as_ref(), &config)?;
//! let model = Vae::new(VaeHyperParams::from_config(&config), Device::Cpu);
//! let report = Trainer::new(config).fit(&model, &dataset)?;
//! println!("best validation loss: {:?}", report.best_val_loss);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod csi;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod losses;
pub mod model;
pub mod trainer;
pub mod video;

pub use config::TrainingConfig;
pub use dataset::{CsiImageDataset, WificamDataset};
pub use error::{TrainError, TrainResult};
pub use model::{ForwardMode, Vae, VaeHyperParams};
pub use trainer::{FitReport, Trainer};

/// Crate version, exposed for provenance logging in the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
