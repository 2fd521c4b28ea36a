//! VAE training objective.
//!
//! The total loss is the sum of a pixel-space reconstruction term and a
//! KL divergence regulariser on the latent Gaussian:
//!
//! ```text
//! L = MSE_sum(recon, target) / B  +  beta * KL(q(z|x) || N(0, I))
//! ```
//!
//! The reconstruction term sums squared error over all pixels and channels
//! before dividing by the batch size, so its scale tracks image resolution
//! rather than averaging it away; the KL term is averaged over the batch.

use tch::{Kind, Reduction, Tensor};

/// Scalar components of one VAE loss evaluation, detached for logging.
#[derive(Debug, Clone, Copy)]
pub struct VaeLossComponents {
    /// Total weighted loss.
    pub total: f32,
    /// Per-sample summed squared reconstruction error.
    pub reconstruction: f32,
    /// Batch-mean KL divergence (unweighted by beta).
    pub kl: f32,
}

/// Per-sample summed squared error, averaged over the batch only.
///
/// `recon` and `target` must share the shape `[B, C, H, W]`.
pub fn reconstruction_loss(recon: &Tensor, target: &Tensor) -> Tensor {
    let batch = recon.size()[0];
    recon.mse_loss(target, Reduction::Sum) / batch
}

/// KL divergence between the posterior `N(mu, exp(logvar))` and the unit
/// Gaussian prior, closed form, summed over latent dimensions and averaged
/// over the batch.
///
/// `mu` and `logvar` must share the shape `[B, z_dim]`.
pub fn kl_divergence(mu: &Tensor, logvar: &Tensor) -> Tensor {
    let per_sample = (logvar + 1.0 - mu.pow_tensor_scalar(2.0) - logvar.exp())
        .sum_dim_intlist(&[1i64][..], false, Kind::Float)
        * -0.5;
    per_sample.mean(Kind::Float)
}

/// Full VAE objective.
///
/// Returns the differentiable total loss tensor together with detached
/// scalar components for logging.
pub fn vae_loss(
    recon: &Tensor,
    target: &Tensor,
    mu: &Tensor,
    logvar: &Tensor,
    beta: f64,
) -> (Tensor, VaeLossComponents) {
    let recon_term = reconstruction_loss(recon, target);
    let kl_term = kl_divergence(mu, logvar);
    let total = &recon_term + &kl_term * beta;

    let components = VaeLossComponents {
        total: total.double_value(&[]) as f32,
        reconstruction: recon_term.double_value(&[]) as f32,
        kl: kl_term.double_value(&[]) as f32,
    };
    (total, components)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::{Device, Kind, Tensor};

    fn scalar(t: &Tensor) -> f32 {
        t.double_value(&[]) as f32
    }

    #[test]
    fn identical_images_have_zero_reconstruction_loss() {
        let img = Tensor::rand([4, 3, 8, 8], (Kind::Float, Device::Cpu));
        let loss = reconstruction_loss(&img, &img.copy());
        assert_abs_diff_eq!(scalar(&loss), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn reconstruction_loss_sums_pixels_and_averages_batch() {
        // Every pixel off by 0.5: sum = B*C*H*W*0.25, divided by B.
        let recon = Tensor::zeros([2, 3, 4, 4], (Kind::Float, Device::Cpu));
        let target = Tensor::full([2, 3, 4, 4], 0.5, (Kind::Float, Device::Cpu));
        let loss = reconstruction_loss(&recon, &target);
        let expected = (3 * 4 * 4) as f32 * 0.25;
        assert_abs_diff_eq!(scalar(&loss), expected, epsilon = 1e-4);
    }

    #[test]
    fn standard_normal_posterior_has_zero_kl() {
        // mu = 0, logvar = 0 is exactly the prior.
        let mu = Tensor::zeros([4, 16], (Kind::Float, Device::Cpu));
        let logvar = Tensor::zeros([4, 16], (Kind::Float, Device::Cpu));
        let kl = kl_divergence(&mu, &logvar);
        assert_abs_diff_eq!(scalar(&kl), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn nonzero_mean_increases_kl() {
        let logvar = Tensor::zeros([4, 16], (Kind::Float, Device::Cpu));
        let mu = Tensor::full([4, 16], 1.0, (Kind::Float, Device::Cpu));
        let kl = kl_divergence(&mu, &logvar);
        // Each dimension contributes mu^2 / 2 = 0.5.
        assert_abs_diff_eq!(scalar(&kl), 8.0, epsilon = 1e-4);
    }

    #[test]
    fn kl_is_non_negative() {
        let mu = Tensor::rand([8, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let logvar = Tensor::rand([8, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let kl = kl_divergence(&mu, &logvar);
        assert!(scalar(&kl) >= -1e-5, "KL must be non-negative, got {}", scalar(&kl));
    }

    #[test]
    fn beta_scales_the_kl_term() {
        let recon = Tensor::zeros([2, 3, 4, 4], (Kind::Float, Device::Cpu));
        let target = recon.copy();
        let mu = Tensor::full([2, 8], 1.0, (Kind::Float, Device::Cpu));
        let logvar = Tensor::zeros([2, 8], (Kind::Float, Device::Cpu));

        let (total_b1, c1) = vae_loss(&recon, &target, &mu, &logvar, 1.0);
        let (total_b2, c2) = vae_loss(&recon, &target, &mu, &logvar, 2.0);

        assert_abs_diff_eq!(c1.reconstruction, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c1.kl, c2.kl, epsilon = 1e-6);
        assert_abs_diff_eq!(
            scalar(&total_b2),
            2.0 * scalar(&total_b1),
            epsilon = 1e-4
        );
    }

    #[test]
    fn components_match_total() {
        let recon = Tensor::rand([2, 3, 4, 4], (Kind::Float, Device::Cpu));
        let target = Tensor::rand([2, 3, 4, 4], (Kind::Float, Device::Cpu));
        let mu = Tensor::rand([2, 8], (Kind::Float, Device::Cpu));
        let logvar = Tensor::rand([2, 8], (Kind::Float, Device::Cpu));

        let beta = 0.5;
        let (_, c) = vae_loss(&recon, &target, &mu, &logvar, beta);
        assert_abs_diff_eq!(
            c.total,
            c.reconstruction + beta as f32 * c.kl,
            epsilon = 1e-4
        );
    }
}
