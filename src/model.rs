//! CSI-to-image variational autoencoder.
//!
//! Architecture:
//!
//! ```text
//! csi [B, W, S]
//!   └─ SequenceEncoder
//!        Conv1d(S -> 128, k3, p1) + BatchNorm + GELU
//!        + learned positional encoding
//!        4 x pre-norm transformer layers (8 heads, ff 512)
//!        mean-pool over time
//!        fc_mu / fc_logvar -> (mu, logvar) [B, z_dim]
//!   └─ reparameterise -> z
//!   └─ ImageDecoder
//!        Linear(z -> 512*4*4)
//!        5 x (bilinear x2 upsample, Conv3x3, BatchNorm, LeakyReLU(0.2),
//!             ResidualBlock)   channels 512 -> 256 -> 128 -> 64 -> 32 -> 16
//!        Conv3x3(16 -> 3) + sigmoid -> recon [B, 3, 128, 128]
//! ```
//!
//! All layers are registered eagerly at construction against a
//! [`nn::VarStore`], so the variable set is fixed before the optimiser is
//! built and checkpoints can be loaded into a freshly constructed model.

use serde::{Deserialize, Serialize};
use tch::nn::{self, ConvConfig, Module, ModuleT};
use tch::{Device, Kind, Tensor};

use crate::config::TrainingConfig;

// ---------------------------------------------------------------------------
// Architecture constants
// ---------------------------------------------------------------------------

/// Embedding width of the temporal encoder.
pub const EMBED_DIM: i64 = 128;
/// Attention heads per transformer layer.
pub const NUM_HEADS: i64 = 8;
/// Number of transformer layers in the encoder.
pub const NUM_LAYERS: usize = 4;
/// Hidden width of the transformer feed-forward blocks.
pub const FF_DIM: i64 = 512;
/// Dropout probability applied in attention and feed-forward blocks.
pub const DROPOUT: f64 = 0.1;

/// Spatial seed of the decoder before upsampling (4x4 at 512 channels).
const DECODER_SEED_CHANNELS: i64 = 512;
const DECODER_SEED_SIZE: i64 = 4;
/// Channel widths after each upsampling stage.
const DECODER_CHANNELS: [i64; 6] = [512, 256, 128, 64, 32, 16];

/// Negative slope of the decoder's leaky ReLU activations.
const LEAKY_SLOPE: f64 = 0.2;

// ---------------------------------------------------------------------------
// Hyperparameters
// ---------------------------------------------------------------------------

/// The subset of the configuration that determines the architecture's
/// variable shapes. Stored alongside checkpoints and compared strictly on
/// restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaeHyperParams {
    /// CSI window length (time axis of the encoder input).
    pub window_size: usize,
    /// Subcarriers per CSI sample (channel axis of the encoder input).
    pub num_subcarriers: usize,
    /// Latent dimensionality.
    pub z_dim: usize,
    /// Learning rate recorded for provenance.
    pub learning_rate: f64,
    /// KL weight recorded for provenance.
    pub beta: f64,
}

impl VaeHyperParams {
    /// Extract the architecture-relevant fields from a full configuration.
    pub fn from_config(config: &TrainingConfig) -> Self {
        VaeHyperParams {
            window_size: config.window_size,
            num_subcarriers: config.num_subcarriers,
            z_dim: config.z_dim,
            learning_rate: config.learning_rate,
            beta: config.beta,
        }
    }
}

// ---------------------------------------------------------------------------
// Forward mode / output
// ---------------------------------------------------------------------------

/// Whether a forward pass samples the latent or uses the posterior mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Sample `z = mu + sigma * eps`; batch-norm uses batch statistics and
    /// dropout is active.
    Train,
    /// Use `z = mu` deterministically; batch-norm uses running statistics
    /// and dropout is disabled.
    Eval,
}

impl ForwardMode {
    fn is_train(self) -> bool {
        matches!(self, ForwardMode::Train)
    }
}

/// Full output of one VAE forward pass.
#[derive(Debug)]
pub struct VaeOutput {
    /// Reconstructed images `[B, 3, 128, 128]` in `[0, 1]`.
    pub recon: Tensor,
    /// Posterior means `[B, z_dim]`.
    pub mu: Tensor,
    /// Posterior log-variances `[B, z_dim]`.
    pub logvar: Tensor,
    /// Latent codes actually decoded `[B, z_dim]`.
    pub z: Tensor,
}

/// Leaky ReLU with a configurable negative slope.
fn leaky_relu(x: &Tensor, slope: f64) -> Tensor {
    x.maximum(&(x * slope))
}

// ---------------------------------------------------------------------------
// Transformer layer
// ---------------------------------------------------------------------------

/// One pre-norm transformer encoder layer: multi-head self-attention and a
/// position-wise feed-forward block, each behind a residual connection.
#[derive(Debug)]
struct TransformerLayer {
    ln1: nn::LayerNorm,
    ln2: nn::LayerNorm,
    q_proj: nn::Linear,
    k_proj: nn::Linear,
    v_proj: nn::Linear,
    out_proj: nn::Linear,
    ff1: nn::Linear,
    ff2: nn::Linear,
}

impl TransformerLayer {
    fn new(p: &nn::Path) -> Self {
        TransformerLayer {
            ln1: nn::layer_norm(p / "ln1", vec![EMBED_DIM], Default::default()),
            ln2: nn::layer_norm(p / "ln2", vec![EMBED_DIM], Default::default()),
            q_proj: nn::linear(p / "q_proj", EMBED_DIM, EMBED_DIM, Default::default()),
            k_proj: nn::linear(p / "k_proj", EMBED_DIM, EMBED_DIM, Default::default()),
            v_proj: nn::linear(p / "v_proj", EMBED_DIM, EMBED_DIM, Default::default()),
            out_proj: nn::linear(p / "out_proj", EMBED_DIM, EMBED_DIM, Default::default()),
            ff1: nn::linear(p / "ff1", EMBED_DIM, FF_DIM, Default::default()),
            ff2: nn::linear(p / "ff2", FF_DIM, EMBED_DIM, Default::default()),
        }
    }

    /// Scaled dot-product self-attention over the time axis.
    fn attention(&self, x: &Tensor, train: bool) -> Tensor {
        let size = x.size();
        let (b, w) = (size[0], size[1]);
        let head_dim = EMBED_DIM / NUM_HEADS;

        // [B, W, E] -> [B, H, W, D]
        let split = |t: Tensor| {
            t.view([b, w, NUM_HEADS, head_dim]).transpose(1, 2)
        };
        let q = split(self.q_proj.forward(x));
        let k = split(self.k_proj.forward(x));
        let v = split(self.v_proj.forward(x));

        let scale = (head_dim as f64).sqrt();
        let scores = q.matmul(&k.transpose(-2, -1)) / scale;
        let weights = scores.softmax(-1, Kind::Float).dropout(DROPOUT, train);

        let context = weights.matmul(&v).transpose(1, 2).reshape([b, w, EMBED_DIM]);
        self.out_proj.forward(&context)
    }

    fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        let x = x
            + self
                .attention(&self.ln1.forward(x), train)
                .dropout(DROPOUT, train);
        let ff = self
            .ff2
            .forward(
                &self
                    .ff1
                    .forward(&self.ln2.forward(&x))
                    .gelu("none")
                    .dropout(DROPOUT, train),
            )
            .dropout(DROPOUT, train);
        x + ff
    }
}

// ---------------------------------------------------------------------------
// Sequence encoder
// ---------------------------------------------------------------------------

/// Temporal encoder mapping a CSI window to latent Gaussian parameters.
#[derive(Debug)]
pub struct SequenceEncoder {
    embed_conv: nn::Conv1D,
    embed_bn: nn::BatchNorm,
    pos_encoding: Tensor,
    layers: Vec<TransformerLayer>,
    fc_mu: nn::Linear,
    fc_logvar: nn::Linear,
}

impl SequenceEncoder {
    fn new(p: &nn::Path, hparams: &VaeHyperParams) -> Self {
        let conv_cfg = ConvConfig { padding: 1, ..Default::default() };
        let embed_conv = nn::conv1d(
            p / "embed_conv",
            hparams.num_subcarriers as i64,
            EMBED_DIM,
            3,
            conv_cfg,
        );
        let embed_bn = nn::batch_norm1d(p / "embed_bn", EMBED_DIM, Default::default());

        let pos_encoding = p.var(
            "pos_encoding",
            &[1, hparams.window_size as i64, EMBED_DIM],
            nn::Init::Randn { mean: 0.0, stdev: 0.02 },
        );

        let layers = (0..NUM_LAYERS)
            .map(|i| TransformerLayer::new(&(p / "layers" / i)))
            .collect();

        let z = hparams.z_dim as i64;
        SequenceEncoder {
            embed_conv,
            embed_bn,
            pos_encoding,
            layers,
            fc_mu: nn::linear(p / "fc_mu", EMBED_DIM, z, Default::default()),
            fc_logvar: nn::linear(p / "fc_logvar", EMBED_DIM, z, Default::default()),
        }
    }

    /// Encode `csi` of shape `[B, W, S]` into `(mu, logvar)`, each
    /// `[B, z_dim]`.
    pub fn forward(&self, csi: &Tensor, train: bool) -> (Tensor, Tensor) {
        // Conv1d wants channels second: [B, W, S] -> [B, S, W].
        let x = csi.transpose(1, 2);
        let x = self.embed_conv.forward(&x);
        let x = self.embed_bn.forward_t(&x, train).gelu("none");
        // Back to time-major for attention: [B, W, E].
        let mut x = x.transpose(1, 2) + &self.pos_encoding;

        for layer in &self.layers {
            x = layer.forward(&x, train);
        }

        let pooled = x.mean_dim(&[1i64][..], false, Kind::Float);
        (self.fc_mu.forward(&pooled), self.fc_logvar.forward(&pooled))
    }
}

// ---------------------------------------------------------------------------
// Image decoder
// ---------------------------------------------------------------------------

/// Two-convolution residual block with identity skip.
#[derive(Debug)]
struct ResidualBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
}

impl ResidualBlock {
    fn new(p: &nn::Path, channels: i64) -> Self {
        let cfg = ConvConfig { padding: 1, bias: false, ..Default::default() };
        ResidualBlock {
            conv1: nn::conv2d(p / "conv1", channels, channels, 3, cfg),
            bn1: nn::batch_norm2d(p / "bn1", channels, Default::default()),
            conv2: nn::conv2d(p / "conv2", channels, channels, 3, cfg),
            bn2: nn::batch_norm2d(p / "bn2", channels, Default::default()),
        }
    }

    fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        let h = self.bn1.forward_t(&self.conv1.forward(x), train);
        let h = leaky_relu(&h, LEAKY_SLOPE);
        let h = self.bn2.forward_t(&self.conv2.forward(&h), train);
        // Identity skip; no activation after the sum.
        h + x
    }
}

/// One decoder stage: bilinear x2 upsample, 3x3 convolution with
/// batch-norm and leaky ReLU, then a residual refinement block.
#[derive(Debug)]
struct UpsampleStage {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    residual: ResidualBlock,
}

impl UpsampleStage {
    fn new(p: &nn::Path, in_channels: i64, out_channels: i64) -> Self {
        let cfg = ConvConfig { padding: 1, ..Default::default() };
        UpsampleStage {
            conv: nn::conv2d(p / "conv", in_channels, out_channels, 3, cfg),
            bn: nn::batch_norm2d(p / "bn", out_channels, Default::default()),
            residual: ResidualBlock::new(&(p / "residual"), out_channels),
        }
    }

    fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        let size = x.size();
        let (h, w) = (size[2], size[3]);
        let x = x.upsample_bilinear2d([h * 2, w * 2], true, None, None);
        let x = self.bn.forward_t(&self.conv.forward(&x), train);
        self.residual.forward(&leaky_relu(&x, LEAKY_SLOPE), train)
    }
}

/// Spatial decoder mapping a latent code to an RGB image.
#[derive(Debug)]
pub struct ImageDecoder {
    fc: nn::Linear,
    stages: Vec<UpsampleStage>,
    final_conv: nn::Conv2D,
}

impl ImageDecoder {
    fn new(p: &nn::Path, hparams: &VaeHyperParams) -> Self {
        let seed = DECODER_SEED_CHANNELS * DECODER_SEED_SIZE * DECODER_SEED_SIZE;
        let fc = nn::linear(p / "fc", hparams.z_dim as i64, seed, Default::default());

        let stages = DECODER_CHANNELS
            .windows(2)
            .enumerate()
            .map(|(i, pair)| UpsampleStage::new(&(p / "stages" / i), pair[0], pair[1]))
            .collect();

        let cfg = ConvConfig { padding: 1, ..Default::default() };
        let final_conv = nn::conv2d(
            p / "final_conv",
            DECODER_CHANNELS[DECODER_CHANNELS.len() - 1],
            3,
            3,
            cfg,
        );

        ImageDecoder { fc, stages, final_conv }
    }

    /// Decode latents `[B, z_dim]` into images `[B, 3, 128, 128]` in
    /// `[0, 1]`.
    pub fn forward(&self, z: &Tensor, train: bool) -> Tensor {
        let b = z.size()[0];
        let mut x = self.fc.forward(z).view([
            b,
            DECODER_SEED_CHANNELS,
            DECODER_SEED_SIZE,
            DECODER_SEED_SIZE,
        ]);
        for stage in &self.stages {
            x = stage.forward(&x, train);
        }
        self.final_conv.forward(&x).sigmoid()
    }
}

// ---------------------------------------------------------------------------
// Vae
// ---------------------------------------------------------------------------

/// The complete CSI-to-image VAE and its variable store.
#[derive(Debug)]
pub struct Vae {
    vs: nn::VarStore,
    encoder: SequenceEncoder,
    decoder: ImageDecoder,
    hparams: VaeHyperParams,
}

impl Vae {
    /// Construct a fresh model on `device` with randomly initialised
    /// weights.
    pub fn new(hparams: VaeHyperParams, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let encoder = SequenceEncoder::new(&(&root / "encoder"), &hparams);
        let decoder = ImageDecoder::new(&(&root / "decoder"), &hparams);
        Vae { vs, encoder, decoder, hparams }
    }

    /// Encode a CSI batch into posterior parameters.
    pub fn encode(&self, csi: &Tensor, mode: ForwardMode) -> (Tensor, Tensor) {
        self.encoder.forward(csi, mode.is_train())
    }

    /// Decode latent codes into images.
    pub fn decode(&self, z: &Tensor, mode: ForwardMode) -> Tensor {
        self.decoder.forward(z, mode.is_train())
    }

    /// Full forward pass.
    ///
    /// In [`ForwardMode::Train`] the latent is sampled via the
    /// reparameterisation trick; in [`ForwardMode::Eval`] the posterior
    /// mean is decoded directly, making the pass deterministic.
    pub fn forward(&self, csi: &Tensor, mode: ForwardMode) -> VaeOutput {
        let (mu, logvar) = self.encode(csi, mode);
        let z = match mode {
            ForwardMode::Train => {
                let std = (&logvar * 0.5).exp();
                &mu + std * mu.randn_like()
            }
            ForwardMode::Eval => mu.shallow_clone(),
        };
        let recon = self.decode(&z, mode);
        VaeOutput { recon, mu, logvar, z }
    }

    /// Deterministic reconstruction with gradients disabled.
    pub fn reconstruct(&self, csi: &Tensor) -> Tensor {
        let _guard = tch::no_grad_guard();
        self.forward(csi, ForwardMode::Eval).recon
    }

    /// The architecture hyperparameters this model was built with.
    pub fn hparams(&self) -> &VaeHyperParams {
        &self.hparams
    }

    /// The device the model's variables live on.
    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Shared access to the variable store (for saving).
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Mutable access to the variable store (for optimiser construction
    /// and weight loading).
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Total number of trainable scalar parameters.
    pub fn num_parameters(&self) -> i64 {
        self.vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel() as i64)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
