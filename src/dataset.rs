//! Windowed CSI/image dataset and batched loading.
//!
//! This module turns raw capture sessions into aligned training pairs:
//!
//! - session discovery walks a root directory recursively for `csi.csv`
//!   tables and their sibling image files;
//! - the temporal-visual aligner pairs each CSI window with the image whose
//!   integer identifier is nearest the id of the window's centre row;
//! - [`WificamDataset`] exposes the concatenation of all sessions for
//!   random-access sampling, decoding images lazily per `get` call;
//! - [`DataLoader`] batches samples into `tch` tensors with deterministic
//!   seeded shuffling for training and preserved order for evaluation.
//!
//! Amplitude matrices stay resident in memory (they are small); image
//! decoding happens at access time, trading repeated disk reads for a low
//! memory footprint.

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tch::Tensor;
use tracing::{debug, info, warn};

use crate::config::{EmptySessionPolicy, TrainingConfig};
use crate::csi::{self, CsiTable};
use crate::error::DatasetError;

/// Side length of the square target image fed to the model.
pub const IMAGE_SIZE: u32 = 128;

/// Image file extensions recognised inside a session directory.
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

// ---------------------------------------------------------------------------
// AlignedSample
// ---------------------------------------------------------------------------

/// A single aligned training pair.
#[derive(Debug, Clone)]
pub struct AlignedSample {
    /// CSI amplitude window of shape `[window_size, NUM_SUBCARRIERS]`.
    pub csi: Array2<f32>,
    /// Target image of shape `[3, IMAGE_SIZE, IMAGE_SIZE]`, RGB channel
    /// order, values in `[0, 1]`.
    pub image: Array3<f32>,
}

// ---------------------------------------------------------------------------
// CsiImageDataset trait
// ---------------------------------------------------------------------------

/// Common interface for aligned CSI/image datasets.
///
/// Implementations must be `Send + Sync` so batch workers can load samples
/// in parallel without additional synchronisation; `get` must not mutate
/// shared state.
pub trait CsiImageDataset: Send + Sync {
    /// Total number of aligned samples.
    fn len(&self) -> usize;

    /// Load the sample at position `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfBounds`] when `idx >= self.len()`
    /// and dataset-specific errors for IO or decode problems.
    fn get(&self, idx: usize) -> Result<AlignedSample, DatasetError>;

    /// Returns `true` when the dataset contains no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Nearest-image search
// ---------------------------------------------------------------------------

/// Index of the identifier in `sorted_ids` nearest to `target`.
///
/// Ties in absolute distance resolve to the smaller identifier, matching
/// the stable first-minimum behaviour of a linear scan over the ascending
/// sequence.
///
/// `sorted_ids` must be non-empty and ascending.
pub fn nearest_image_index(sorted_ids: &[i64], target: i64) -> usize {
    debug_assert!(!sorted_ids.is_empty());
    let p = sorted_ids.partition_point(|&v| v < target);
    if p == 0 {
        return 0;
    }
    if p == sorted_ids.len() {
        return p - 1;
    }
    let below = target - sorted_ids[p - 1];
    let above = sorted_ids[p] - target;
    if below <= above {
        p - 1
    } else {
        p
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One capture session after alignment.
///
/// `targets[w]` is the index into `image_paths` selected for the window
/// starting at CSI row `w`.
#[derive(Debug)]
struct Session {
    amplitudes: Array2<f32>,
    /// CSI row ids, ascending.
    ids: Vec<i64>,
    /// Image paths sorted by their integer identifier, ascending.
    image_paths: Vec<PathBuf>,
    /// Per-window target image index.
    targets: Vec<usize>,
}

impl Session {
    /// Number of aligned windows this session contributes:
    /// `max(0, rows - window_size)`.
    fn num_windows(&self) -> usize {
        self.targets.len()
    }
}

/// Collect `(id, path)` pairs for every recognised image file in `dir`,
/// sorted by id ascending. Files whose stem does not parse as an integer
/// are ignored with a debug log.
fn collect_images(dir: &Path) -> Result<(Vec<i64>, Vec<PathBuf>), DatasetError> {
    let mut found: Vec<(i64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let Some(ext) = ext else { continue };
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<i64>().ok()) {
            Some(id) => found.push((id, path)),
            None => debug!("Ignoring non-integer image name {}", path.display()),
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found.into_iter().unzip())
}

/// Build the aligned window list for one session.
///
/// For each start offset `i` in `0..rows - window_size`, the target image
/// is the one nearest the id of the row at `i + window_size / 2`.
fn align_session(
    dir: &Path,
    table: CsiTable,
    window_size: usize,
) -> Result<Session, DatasetError> {
    let (image_ids, image_paths) = collect_images(dir)?;
    if image_ids.is_empty() {
        return Err(DatasetError::EmptySession { path: dir.to_path_buf() });
    }

    let rows = table.num_rows();
    let num_windows = rows.saturating_sub(window_size);
    let mut targets = Vec::with_capacity(num_windows);
    for start in 0..num_windows {
        let center_id = table.ids[start + window_size / 2];
        targets.push(nearest_image_index(&image_ids, center_id));
    }

    Ok(Session {
        amplitudes: table.amplitudes,
        ids: table.ids,
        image_paths,
        targets,
    })
}

/// Recursively collect every directory under `root` that contains a
/// `csi.csv`, in sorted order for deterministic dataset construction.
fn find_session_dirs(root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if dir.join("csi.csv").is_file() {
            dirs.push(dir.clone());
        }
        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        children.sort();
        stack.extend(children);
    }
    dirs.sort();
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// WificamDataset
// ---------------------------------------------------------------------------

/// Fixed-size, randomly-indexable container over all aligned samples of
/// every capture session found recursively under a root directory.
///
/// Construction order is session-then-intra-session offset; shuffling is a
/// sampling-time concern handled by [`DataLoader`].
#[derive(Debug)]
pub struct WificamDataset {
    sessions: Vec<Session>,
    /// Prefix sums of per-session window counts, length `sessions + 1`.
    cumulative: Vec<usize>,
    window_size: usize,
}

impl WificamDataset {
    /// Scan `root` for capture sessions and build the aligned sample index.
    ///
    /// Sessions without images are skipped with a warning or abort the
    /// build, per `config.empty_session_policy`. A malformed CSI table
    /// always aborts.
    ///
    /// # Errors
    ///
    /// - [`DatasetError::DirectoryNotFound`] when `root` does not exist.
    /// - [`DatasetError::NoSessions`] when no `csi.csv` is found.
    /// - [`DatasetError::EmptySession`] under the `Fail` policy.
    /// - CSI parse errors from [`csi::load_amplitudes`].
    pub fn discover(root: &Path, config: &TrainingConfig) -> Result<Self, DatasetError> {
        if !root.exists() {
            return Err(DatasetError::DirectoryNotFound { path: root.to_path_buf() });
        }

        let session_dirs = find_session_dirs(root)?;
        if session_dirs.is_empty() {
            return Err(DatasetError::NoSessions { root: root.to_path_buf() });
        }

        let mut sessions = Vec::new();
        for dir in &session_dirs {
            let table = csi::load_amplitudes(&dir.join("csi.csv"))?;
            match align_session(dir, table, config.window_size) {
                Ok(session) => {
                    debug!(
                        "Session {}: {} CSI rows, {} images, {} windows",
                        dir.display(),
                        session.ids.len(),
                        session.image_paths.len(),
                        session.num_windows()
                    );
                    sessions.push(session);
                }
                Err(e @ DatasetError::EmptySession { .. }) => {
                    match config.empty_session_policy {
                        EmptySessionPolicy::Skip => {
                            warn!("Skipping session without images: {e}");
                        }
                        EmptySessionPolicy::Fail => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let mut cumulative = vec![0usize; sessions.len() + 1];
        for (i, s) in sessions.iter().enumerate() {
            cumulative[i + 1] = cumulative[i] + s.num_windows();
        }

        info!(
            "WificamDataset: {} sessions, {} aligned samples (root={})",
            sessions.len(),
            cumulative.last().copied().unwrap_or(0),
            root.display()
        );

        Ok(WificamDataset { sessions, cumulative, window_size: config.window_size })
    }

    /// The configured CSI window length.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Resolve a global sample index to `(session_index, window_offset)`.
    fn locate(&self, idx: usize) -> Option<(usize, usize)> {
        let total = self.cumulative.last().copied().unwrap_or(0);
        if idx >= total {
            return None;
        }
        let session_idx = self.cumulative.partition_point(|&c| c <= idx).saturating_sub(1);
        Some((session_idx, idx - self.cumulative[session_idx]))
    }

    /// CSI row id at the temporal centre of the window for sample `idx`.
    ///
    /// Exposed for alignment verification; returns `None` for an
    /// out-of-range index.
    pub fn center_id(&self, idx: usize) -> Option<i64> {
        let (s, offset) = self.locate(idx)?;
        Some(self.sessions[s].ids[offset + self.window_size / 2])
    }
}

impl CsiImageDataset for WificamDataset {
    fn len(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    fn get(&self, idx: usize) -> Result<AlignedSample, DatasetError> {
        let (session_idx, offset) = self
            .locate(idx)
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.len() })?;
        let session = &self.sessions[session_idx];

        let csi = session
            .amplitudes
            .slice(ndarray::s![offset..offset + self.window_size, ..])
            .to_owned();
        let image_path = &session.image_paths[session.targets[offset]];
        let image = load_image(image_path)?;

        Ok(AlignedSample { csi, image })
    }
}

/// Decode `path`, resize to [`IMAGE_SIZE`]², and normalise to CHW `[0, 1]`.
fn load_image(path: &Path) -> Result<Array3<f32>, DatasetError> {
    let decoded = image::open(path)
        .map_err(|source| DatasetError::ImageDecode { path: path.to_path_buf(), source })?;
    let rgb = decoded
        .resize_exact(IMAGE_SIZE, IMAGE_SIZE, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let size = IMAGE_SIZE as usize;
    let mut out = Array3::zeros((3, size, size));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            out[[c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Train/validation split
// ---------------------------------------------------------------------------

/// Deterministic contiguous split of `0..len` into train and validation
/// index sets: the leading `1 - val_fraction` share trains, the tail
/// validates. No shuffling, so the split is reproducible across runs.
pub fn split_indices(len: usize, val_fraction: f64) -> (Vec<usize>, Vec<usize>) {
    let val_len = (len as f64 * val_fraction).round() as usize;
    let train_len = len.saturating_sub(val_len);
    ((0..train_len).collect(), (train_len..len).collect())
}

// ---------------------------------------------------------------------------
// Batch / DataLoader
// ---------------------------------------------------------------------------

/// One collated mini-batch on the CPU.
pub struct Batch {
    /// CSI windows: `[B, window_size, NUM_SUBCARRIERS]`, `f32`.
    pub csi: Tensor,
    /// Target images: `[B, 3, IMAGE_SIZE, IMAGE_SIZE]`, `f32` in `[0, 1]`.
    pub images: Tensor,
}

/// Batched iterator over a subset of a [`CsiImageDataset`].
///
/// Training loaders shuffle their index subset with a deterministic seeded
/// permutation, reseeded per epoch; evaluation loaders preserve the given
/// order. Only complete batches are yielded (`drop_last` semantics), so
/// every training step sees a full batch.
///
/// Samples within a batch are loaded in parallel on the rayon pool of the
/// calling context; image decode is read-only, so workers share the
/// dataset without synchronisation.
pub struct DataLoader<'a> {
    dataset: &'a dyn CsiImageDataset,
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl std::fmt::Debug for DataLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("indices", &self.indices)
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl<'a> DataLoader<'a> {
    /// Create a loader over an explicit index subset of `dataset`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfBounds`] when any index exceeds
    /// the dataset length.
    pub fn new(
        dataset: &'a dyn CsiImageDataset,
        indices: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self, DatasetError> {
        assert!(batch_size > 0, "batch_size must be > 0");
        let len = dataset.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(DatasetError::IndexOutOfBounds { idx: bad, len });
        }
        Ok(DataLoader { dataset, indices, batch_size, shuffle, seed })
    }

    /// Loader over the full dataset in construction order.
    pub fn over_all(
        dataset: &'a dyn CsiImageDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self, DatasetError> {
        let indices = (0..dataset.len()).collect();
        Self::new(dataset, indices, batch_size, shuffle, seed)
    }

    /// Number of complete batches yielded per epoch.
    pub fn num_batches(&self) -> usize {
        self.indices.len() / self.batch_size
    }

    /// Iterate the batches for `epoch`.
    ///
    /// Shuffling loaders derive the permutation from `seed` and `epoch`,
    /// so each epoch sees an independent order that is still reproducible
    /// across runs.
    pub fn iter_epoch(&self, epoch: usize) -> DataLoaderIter<'_> {
        let mut order = self.indices.clone();
        if self.shuffle {
            xorshift_shuffle(&mut order, self.seed.wrapping_add(epoch as u64));
        }
        DataLoaderIter {
            dataset: self.dataset,
            order,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator returned by [`DataLoader::iter_epoch`].
pub struct DataLoaderIter<'a> {
    dataset: &'a dyn CsiImageDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Iterator for DataLoaderIter<'a> {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        // drop_last: stop as soon as a full batch cannot be formed.
        if self.cursor + self.batch_size > self.order.len() {
            return None;
        }
        let batch_indices = &self.order[self.cursor..self.cursor + self.batch_size];
        self.cursor += self.batch_size;

        let samples: Result<Vec<AlignedSample>, DatasetError> = batch_indices
            .par_iter()
            .map(|&i| self.dataset.get(i))
            .collect();

        Some(samples.map(collate))
    }
}

/// Stack a batch of samples into CPU tensors.
pub(crate) fn collate(samples: Vec<AlignedSample>) -> Batch {
    let b = samples.len();
    let (w, s) = {
        let shape = samples[0].csi.shape();
        (shape[0], shape[1])
    };
    let img = IMAGE_SIZE as usize;

    let mut csi_flat = Vec::with_capacity(b * w * s);
    let mut image_flat = Vec::with_capacity(b * 3 * img * img);
    for sample in &samples {
        csi_flat.extend(sample.csi.iter().copied());
        image_flat.extend(sample.image.iter().copied());
    }

    Batch {
        csi: Tensor::from_slice(&csi_flat).view([b as i64, w as i64, s as i64]),
        images: Tensor::from_slice(&image_flat).view([b as i64, 3, img as i64, img as i64]),
    }
}

/// In-place Fisher-Yates shuffle using a 64-bit Xorshift PRNG seeded with
/// `seed`. Reproducible across platforms without an external RNG crate.
fn xorshift_shuffle(indices: &mut [usize], seed: u64) {
    let n = indices.len();
    if n <= 1 {
        return;
    }
    let mut state = if seed == 0 { 0x853c49e6748fea9b } else { seed };
    for i in (1..n).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        indices.swap(i, j);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ----- nearest_image_index ---------------------------------------------

    #[test]
    fn nearest_prefers_closer_id() {
        // 24 is closer to 20 than to 30.
        assert_eq!(nearest_image_index(&[10, 20, 30], 24), 1);
        assert_eq!(nearest_image_index(&[10, 20, 30], 27), 2);
    }

    #[test]
    fn nearest_tie_resolves_to_lower_id() {
        // 25 is equidistant from 20 and 30.
        assert_eq!(nearest_image_index(&[10, 20, 30], 25), 1);
    }

    #[test]
    fn nearest_clamps_at_boundaries() {
        assert_eq!(nearest_image_index(&[10, 20, 30], -5), 0);
        assert_eq!(nearest_image_index(&[10, 20, 30], 99), 2);
    }

    #[test]
    fn nearest_exact_match() {
        assert_eq!(nearest_image_index(&[10, 20, 30], 30), 2);
    }

    #[test]
    fn nearest_single_candidate() {
        assert_eq!(nearest_image_index(&[42], 0), 0);
        assert_eq!(nearest_image_index(&[42], 1000), 0);
    }

    // ----- split_indices ----------------------------------------------------

    #[test]
    fn split_is_contiguous_and_complete() {
        let (train, val) = split_indices(10, 0.3);
        assert_eq!(train, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(val, vec![7, 8, 9]);
    }

    #[test]
    fn split_empty_dataset() {
        let (train, val) = split_indices(0, 0.3);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    // ----- xorshift_shuffle -------------------------------------------------

    #[test]
    fn xorshift_shuffle_is_permutation() {
        let mut indices: Vec<usize> = (0..20).collect();
        xorshift_shuffle(&mut indices, 42);
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn xorshift_shuffle_is_deterministic() {
        let mut a: Vec<usize> = (0..20).collect();
        let mut b: Vec<usize> = (0..20).collect();
        xorshift_shuffle(&mut a, 123);
        xorshift_shuffle(&mut b, 123);
        assert_eq!(a, b);
    }

    #[test]
    fn different_epochs_shuffle_differently() {
        let mut a: Vec<usize> = (0..50).collect();
        let mut b: Vec<usize> = (0..50).collect();
        xorshift_shuffle(&mut a, 42u64.wrapping_add(0));
        xorshift_shuffle(&mut b, 42u64.wrapping_add(1));
        assert_ne!(a, b);
    }
}
