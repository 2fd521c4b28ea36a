//! Reconstruction preview rendering.
//!
//! [`write_reconstruction_video`] runs a trained model over a dataset in
//! construction order and renders a side-by-side comparison video: the
//! ground-truth camera frame on the left, the reconstruction decoded from
//! the CSI window on the right. Sampling every `stride`-th aligned sample
//! keeps the video short while still sweeping the whole capture timeline.

use image::RgbImage;
use ndarray::Array3;
use rayon::prelude::*;
use std::path::Path;
use tch::Tensor;
use tracing::info;

use crate::dataset::{collate, AlignedSample, CsiImageDataset, IMAGE_SIZE};
use crate::error::{DatasetError, TrainResult};
use crate::model::Vae;
use crate::video::VideoWriter;

/// Default playback rate of the preview video.
pub const VIDEO_FPS: u32 = 10;
/// Default sampling stride over the aligned dataset.
pub const FRAME_STRIDE: usize = 10;

/// Render the ground-truth/reconstruction comparison video to `out`.
///
/// Every `stride`-th sample (in dataset order) contributes one frame of
/// `2 * IMAGE_SIZE x IMAGE_SIZE` pixels. The forward pass runs in
/// deterministic evaluation mode with gradients disabled, so repeated
/// invocations produce identical videos.
///
/// Returns the number of frames written.
pub fn write_reconstruction_video(
    model: &Vae,
    dataset: &dyn CsiImageDataset,
    batch_size: usize,
    out: &Path,
    fps: u32,
    stride: usize,
) -> TrainResult<usize> {
    assert!(stride > 0, "stride must be > 0");
    assert!(batch_size > 0, "batch_size must be > 0");

    let _guard = tch::no_grad_guard();
    let device = model.device();
    let mut writer = VideoWriter::new(out, 2 * IMAGE_SIZE, IMAGE_SIZE, fps);

    let indices: Vec<usize> = (0..dataset.len()).step_by(stride).collect();
    info!(
        "Rendering {} of {} samples (stride {}) to {}",
        indices.len(),
        dataset.len(),
        stride,
        out.display()
    );

    for group in indices.chunks(batch_size) {
        let samples: Vec<AlignedSample> = group
            .par_iter()
            .map(|&i| dataset.get(i))
            .collect::<Result<_, DatasetError>>()?;

        let batch = collate(samples.clone());
        let recon = model.reconstruct(&batch.csi.to_device(device)).to_device(tch::Device::Cpu);

        for (row, sample) in samples.iter().enumerate() {
            let truth = array_to_rgb(&sample.image);
            let predicted = tensor_to_rgb(&recon.get(row as i64))?;
            writer.add_frame(&side_by_side(&truth, &predicted))?;
        }
    }

    writer.finish()
}

/// Convert a CHW `[0, 1]` array into an 8-bit RGB image.
fn array_to_rgb(image: &Array3<f32>) -> RgbImage {
    RgbImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
        let px = |c: usize| {
            (image[[c, y as usize, x as usize]].clamp(0.0, 1.0) * 255.0).round() as u8
        };
        image::Rgb([px(0), px(1), px(2)])
    })
}

/// Convert a CHW `[3, IMAGE_SIZE, IMAGE_SIZE]` tensor in `[0, 1]` into an
/// 8-bit RGB image.
fn tensor_to_rgb(t: &Tensor) -> TrainResult<RgbImage> {
    let values = Vec::<f32>::try_from(t.reshape([-1]))?;
    let size = IMAGE_SIZE as usize;
    Ok(RgbImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
        let px = |c: usize| {
            let v = values[c * size * size + y as usize * size + x as usize];
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        image::Rgb([px(0), px(1), px(2)])
    }))
}

/// Compose truth (left) and reconstruction (right) into one frame.
fn side_by_side(truth: &RgbImage, recon: &RgbImage) -> RgbImage {
    let mut frame = RgbImage::new(2 * IMAGE_SIZE, IMAGE_SIZE);
    image::imageops::replace(&mut frame, truth, 0, 0);
    image::imageops::replace(&mut frame, recon, IMAGE_SIZE as i64, 0);
    frame
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn array_conversion_scales_to_bytes() {
        let mut image = Array3::zeros((3, IMAGE_SIZE as usize, IMAGE_SIZE as usize));
        image[[0, 0, 0]] = 1.0;
        image[[1, 0, 0]] = 0.5;

        let rgb = array_to_rgb(&image);
        let px = rgb.get_pixel(0, 0);
        assert_eq!(px[0], 255);
        assert_eq!(px[1], 128);
        assert_eq!(px[2], 0);
    }

    #[test]
    fn array_conversion_clamps_out_of_range() {
        let mut image = Array3::zeros((3, IMAGE_SIZE as usize, IMAGE_SIZE as usize));
        image[[0, 0, 0]] = 2.0;
        image[[1, 0, 0]] = -1.0;

        let px = *array_to_rgb(&image).get_pixel(0, 0);
        assert_eq!(px[0], 255);
        assert_eq!(px[1], 0);
    }

    #[test]
    fn tensor_conversion_matches_layout() {
        let size = IMAGE_SIZE as i64;
        // Red channel all ones, rest zero.
        let t = Tensor::cat(
            &[
                Tensor::ones([1, size, size], (tch::Kind::Float, tch::Device::Cpu)),
                Tensor::zeros([2, size, size], (tch::Kind::Float, tch::Device::Cpu)),
            ],
            0,
        );
        let rgb = tensor_to_rgb(&t).unwrap();
        let px = rgb.get_pixel(IMAGE_SIZE / 2, IMAGE_SIZE / 2);
        assert_eq!((px[0], px[1], px[2]), (255, 0, 0));
    }

    #[test]
    fn side_by_side_places_panels() {
        let truth = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, image::Rgb([255, 0, 0]));
        let recon = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, image::Rgb([0, 0, 255]));

        let frame = side_by_side(&truth, &recon);
        assert_eq!(frame.dimensions(), (2 * IMAGE_SIZE, IMAGE_SIZE));
        assert_eq!(frame.get_pixel(0, 0)[0], 255);
        assert_eq!(frame.get_pixel(IMAGE_SIZE, 0)[2], 255);
    }
}
