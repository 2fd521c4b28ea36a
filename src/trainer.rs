//! Training orchestration.
//!
//! [`Trainer::fit`] owns the full optimisation loop: contiguous
//! train/validation split, per-epoch shuffled batching, AdamW with cosine
//! learning-rate decay and gradient clipping, deterministic-mode
//! validation, and policy-driven checkpointing. Batch samples are loaded
//! on a dedicated rayon pool sized by `num_workers`, so image decode for
//! a batch runs in parallel across workers.
//!
//! A non-finite loss is logged and training continues; the optimiser step
//! still runs so the failure stays visible in the loss curve rather than
//! being papered over.

use std::f64::consts::PI;
use tch::nn::OptimizerConfig;
use tracing::{debug, info, warn};

use crate::checkpoint;
use crate::config::{CheckpointPolicy, TrainingConfig};
use crate::dataset::{split_indices, Batch, CsiImageDataset, DataLoader};
use crate::error::{TrainError, TrainResult};
use crate::losses::{vae_loss, VaeLossComponents};
use crate::model::{ForwardMode, Vae};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Aggregated statistics of one completed epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Mean training loss components over the epoch's batches.
    pub train: VaeLossComponents,
    /// Mean validation loss components, absent when the validation split
    /// yields no complete batch.
    pub val: Option<VaeLossComponents>,
    /// Learning rate used for this epoch.
    pub learning_rate: f64,
}

/// Summary of a full [`Trainer::fit`] run.
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Per-epoch statistics in order.
    pub epochs: Vec<EpochStats>,
    /// Best (lowest) validation total loss seen, if any epoch validated.
    pub best_val_loss: Option<f32>,
    /// Zero-based index of the epoch that achieved `best_val_loss`.
    pub best_epoch: Option<usize>,
}

/// Running mean of loss components.
#[derive(Default)]
struct LossAccumulator {
    total: f64,
    reconstruction: f64,
    kl: f64,
    count: usize,
}

impl LossAccumulator {
    fn push(&mut self, c: VaeLossComponents) {
        self.total += c.total as f64;
        self.reconstruction += c.reconstruction as f64;
        self.kl += c.kl as f64;
        self.count += 1;
    }

    fn mean(&self) -> Option<VaeLossComponents> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(VaeLossComponents {
            total: (self.total / n) as f32,
            reconstruction: (self.reconstruction / n) as f32,
            kl: (self.kl / n) as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Drives the optimisation of a [`Vae`] over an aligned dataset.
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    /// Create a trainer from a validated configuration.
    pub fn new(config: TrainingConfig) -> Self {
        Trainer { config }
    }

    /// The configuration this trainer runs with.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Cosine-decayed learning rate for `epoch`.
    fn learning_rate_at(&self, epoch: usize) -> f64 {
        let t = (epoch as f64) / (self.config.lr_t_max as f64);
        self.config.learning_rate * 0.5 * (1.0 + (PI * t).cos())
    }

    /// Run the full training loop.
    ///
    /// # Errors
    ///
    /// - [`TrainError::EmptyDataset`] when the dataset has zero samples.
    /// - [`TrainError::NoBatches`] when the training split cannot form a
    ///   single complete batch.
    /// - Dataset, checkpoint, and tensor-backend errors are propagated.
    pub fn fit(&self, model: &Vae, dataset: &dyn CsiImageDataset) -> TrainResult<FitReport> {
        if dataset.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        tch::manual_seed(self.config.seed as i64);

        let (train_indices, val_indices) =
            split_indices(dataset.len(), self.config.val_fraction);
        let train_loader = DataLoader::new(
            dataset,
            train_indices,
            self.config.batch_size,
            true,
            self.config.seed,
        )?;
        let val_loader = DataLoader::new(
            dataset,
            val_indices,
            self.config.eval_batch_size(),
            false,
            self.config.seed,
        )?;

        if train_loader.num_batches() == 0 {
            return Err(TrainError::NoBatches(format!(
                "training split too small for batch_size={}",
                self.config.batch_size
            )));
        }
        if val_loader.num_batches() == 0 {
            warn!(
                "Validation split yields no complete batch; epochs will report \
                 training loss only"
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_workers)
            .build()
            .map_err(|e| TrainError::NoBatches(e.to_string()))?;

        let mut opt = tch::nn::adamw(0.9, 0.999, self.config.weight_decay)
            .build(model.var_store(), self.config.learning_rate)?;

        info!(
            "Training {} parameters for {} epochs ({} train / {} val batches per epoch)",
            model.num_parameters(),
            self.config.num_epochs,
            train_loader.num_batches(),
            val_loader.num_batches()
        );

        let device = model.device();
        let mut report = FitReport { epochs: Vec::new(), best_val_loss: None, best_epoch: None };

        for epoch in 0..self.config.num_epochs {
            let lr = self.learning_rate_at(epoch);
            opt.set_lr(lr);

            let mut acc = LossAccumulator::default();
            let mut batches = train_loader.iter_epoch(epoch);
            let mut batch_idx = 0usize;
            while let Some(batch) = pool.install(|| batches.next()) {
                let Batch { csi, images } = batch?;
                let csi = csi.to_device(device);
                let images = images.to_device(device);

                let out = model.forward(&csi, ForwardMode::Train);
                let (loss, components) =
                    vae_loss(&out.recon, &images, &out.mu, &out.logvar, self.config.beta);

                if !components.total.is_finite() {
                    warn!(
                        "Non-finite loss at epoch {} batch {}: total={}",
                        epoch, batch_idx, components.total
                    );
                }

                opt.zero_grad();
                loss.backward();
                opt.clip_grad_norm(self.config.grad_clip_norm);
                opt.step();

                acc.push(components);
                if batch_idx % 50 == 0 {
                    debug!(
                        "epoch {} batch {}: loss={:.4} recon={:.4} kl={:.4}",
                        epoch, batch_idx, components.total, components.reconstruction,
                        components.kl
                    );
                }
                batch_idx += 1;
            }
            let train_mean = acc
                .mean()
                .ok_or_else(|| TrainError::NoBatches("training epoch yielded no batch".into()))?;

            let val_mean = self.validate(model, &val_loader, &pool)?;

            match val_mean {
                Some(v) => info!(
                    "epoch {}/{}: lr={:.2e} train={:.4} val={:.4} (recon={:.4} kl={:.4})",
                    epoch + 1,
                    self.config.num_epochs,
                    lr,
                    train_mean.total,
                    v.total,
                    v.reconstruction,
                    v.kl
                ),
                None => info!(
                    "epoch {}/{}: lr={:.2e} train={:.4}",
                    epoch + 1,
                    self.config.num_epochs,
                    lr,
                    train_mean.total
                ),
            }

            let improved = match (val_mean, report.best_val_loss) {
                (Some(v), Some(best)) => v.total < best,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if improved {
                report.best_val_loss = val_mean.map(|v| v.total);
                report.best_epoch = Some(epoch);
            }

            match self.config.checkpoint_policy {
                CheckpointPolicy::EveryEpoch => {
                    let val_tag = val_mean.map(|v| v.total).unwrap_or(f32::NAN);
                    let name = format!("epoch={:03}-val_loss={:.4}.ot", epoch + 1, val_tag);
                    checkpoint::save(model, &self.config.checkpoint_dir.join(name))?;
                }
                CheckpointPolicy::BestOnly => {
                    if improved {
                        checkpoint::save(model, &self.config.checkpoint_dir.join("best.ot"))?;
                    }
                }
            }

            report.epochs.push(EpochStats {
                epoch,
                train: train_mean,
                val: val_mean,
                learning_rate: lr,
            });
        }

        Ok(report)
    }

    /// Evaluate mean validation loss in deterministic mode.
    fn validate(
        &self,
        model: &Vae,
        loader: &DataLoader,
        pool: &rayon::ThreadPool,
    ) -> TrainResult<Option<VaeLossComponents>> {
        let _guard = tch::no_grad_guard();
        let device = model.device();

        let mut acc = LossAccumulator::default();
        let mut batches = loader.iter_epoch(0);
        while let Some(batch) = pool.install(|| batches.next()) {
            let Batch { csi, images } = batch?;
            let csi = csi.to_device(device);
            let images = images.to_device(device);

            let out = model.forward(&csi, ForwardMode::Eval);
            let (_, components) =
                vae_loss(&out.recon, &images, &out.mu, &out.logvar, self.config.beta);
            acc.push(components);
        }
        Ok(acc.mean())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cosine_schedule_starts_at_base_rate() {
        let trainer = Trainer::new(TrainingConfig::default());
        assert_abs_diff_eq!(trainer.learning_rate_at(0), 1e-3, epsilon = 1e-12);
    }

    #[test]
    fn cosine_schedule_decays_monotonically_within_horizon() {
        let trainer = Trainer::new(TrainingConfig::default());
        let mut prev = f64::INFINITY;
        for epoch in 0..=trainer.config().lr_t_max {
            let lr = trainer.learning_rate_at(epoch);
            assert!(lr <= prev, "lr must not increase before t_max");
            prev = lr;
        }
    }

    #[test]
    fn cosine_schedule_reaches_zero_at_horizon() {
        let trainer = Trainer::new(TrainingConfig::default());
        let lr = trainer.learning_rate_at(trainer.config().lr_t_max);
        assert_abs_diff_eq!(lr, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn loss_accumulator_averages() {
        let mut acc = LossAccumulator::default();
        acc.push(VaeLossComponents { total: 2.0, reconstruction: 1.0, kl: 1.0 });
        acc.push(VaeLossComponents { total: 4.0, reconstruction: 3.0, kl: 1.0 });
        let mean = acc.mean().unwrap();
        assert_abs_diff_eq!(mean.total, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mean.reconstruction, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_accumulator_has_no_mean() {
        assert!(LossAccumulator::default().mean().is_none());
    }
}
