//! MJPEG-in-AVI video output.
//!
//! Reconstruction previews are written as Motion-JPEG streams in a RIFF
//! AVI container. Each frame is an independently JPEG-compressed image in
//! a `00dc` chunk, so the file needs no inter-frame codec state and plays
//! in any stock media player. Frames are buffered in compressed form and
//! the container is written in one pass by [`VideoWriter::finish`], which
//! is when the header sizes and the `idx1` index become known.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::TrainResult;

/// JPEG quality used for each frame.
const JPEG_QUALITY: u8 = 90;

/// AVIF_HASINDEX: the file carries an `idx1` chunk.
const AVIH_FLAG_HAS_INDEX: u32 = 0x10;
/// AVIIF_KEYFRAME: every MJPEG frame is independently decodable.
const IDX_FLAG_KEYFRAME: u32 = 0x10;

// ---------------------------------------------------------------------------
// RIFF helpers
// ---------------------------------------------------------------------------

fn push_fourcc(out: &mut Vec<u8>, cc: &[u8; 4]) {
    out.extend_from_slice(cc);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// A `fourcc + size + data` chunk, padded to even length.
fn chunk(cc: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len() + 1);
    push_fourcc(&mut out, cc);
    push_u32(&mut out, data.len() as u32);
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// A `LIST` chunk with the given list type.
fn list(list_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + data.len());
    push_fourcc(&mut body, list_type);
    body.extend_from_slice(data);
    chunk(b"LIST", &body)
}

// ---------------------------------------------------------------------------
// VideoWriter
// ---------------------------------------------------------------------------

/// Buffers JPEG-compressed frames and writes an MJPEG AVI on `finish`.
pub struct VideoWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    frames: Vec<Vec<u8>>,
}

impl VideoWriter {
    /// Create a writer targeting `path`. Nothing touches the filesystem
    /// until [`finish`](VideoWriter::finish).
    pub fn new(path: &Path, width: u32, height: u32, fps: u32) -> Self {
        assert!(fps > 0, "fps must be > 0");
        assert!(width > 0 && height > 0, "frame dimensions must be > 0");
        VideoWriter {
            path: path.to_path_buf(),
            width,
            height,
            fps,
            frames: Vec::new(),
        }
    }

    /// Number of frames appended so far.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Compress and append one frame. The frame must match the writer's
    /// declared dimensions.
    pub fn add_frame(&mut self, frame: &RgbImage) -> TrainResult<()> {
        assert_eq!(
            (frame.width(), frame.height()),
            (self.width, self.height),
            "frame dimensions must match the writer"
        );
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            frame.as_raw(),
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        self.frames.push(jpeg);
        Ok(())
    }

    /// Write the complete AVI file, creating parent directories as needed,
    /// and return the number of frames written.
    pub fn finish(self) -> TrainResult<usize> {
        let num_frames = self.frames.len();
        let max_frame = self.frames.iter().map(Vec::len).max().unwrap_or(0) as u32;

        // movi list: one 00dc chunk per frame; idx1 offsets are relative to
        // the position of the 'movi' fourcc, so the first chunk sits at 4.
        let mut movi_body = Vec::new();
        let mut index = Vec::with_capacity(num_frames * 16);
        for frame in &self.frames {
            let offset = 4 + movi_body.len() as u32;
            push_fourcc(&mut index, b"00dc");
            push_u32(&mut index, IDX_FLAG_KEYFRAME);
            push_u32(&mut index, offset);
            push_u32(&mut index, frame.len() as u32);
            movi_body.extend_from_slice(&chunk(b"00dc", frame));
        }

        let mut file = Vec::new();
        file.extend_from_slice(&list(
            b"hdrl",
            &[
                chunk(b"avih", &self.main_header(num_frames as u32, max_frame)),
                list(
                    b"strl",
                    &[
                        chunk(b"strh", &self.stream_header(num_frames as u32, max_frame)),
                        chunk(b"strf", &self.bitmap_info()),
                    ]
                    .concat(),
                ),
            ]
            .concat(),
        ));
        file.extend_from_slice(&list(b"movi", &movi_body));
        file.extend_from_slice(&chunk(b"idx1", &index));

        let mut riff_body = Vec::with_capacity(4 + file.len());
        push_fourcc(&mut riff_body, b"AVI ");
        riff_body.extend_from_slice(&file);
        let riff = chunk(b"RIFF", &riff_body);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, riff)?;
        info!(
            "Wrote {} frames ({}x{} @ {} fps) to {}",
            num_frames,
            self.width,
            self.height,
            self.fps,
            self.path.display()
        );
        Ok(num_frames)
    }

    /// The 56-byte `avih` main header payload.
    fn main_header(&self, num_frames: u32, max_frame: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(56);
        push_u32(&mut h, 1_000_000 / self.fps); // microseconds per frame
        push_u32(&mut h, max_frame.saturating_mul(self.fps)); // max bytes/sec
        push_u32(&mut h, 0); // padding granularity
        push_u32(&mut h, AVIH_FLAG_HAS_INDEX);
        push_u32(&mut h, num_frames);
        push_u32(&mut h, 0); // initial frames
        push_u32(&mut h, 1); // streams
        push_u32(&mut h, max_frame); // suggested buffer size
        push_u32(&mut h, self.width);
        push_u32(&mut h, self.height);
        for _ in 0..4 {
            push_u32(&mut h, 0); // reserved
        }
        h
    }

    /// The 56-byte `strh` video stream header payload.
    fn stream_header(&self, num_frames: u32, max_frame: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(56);
        push_fourcc(&mut h, b"vids");
        push_fourcc(&mut h, b"MJPG");
        push_u32(&mut h, 0); // flags
        push_u16(&mut h, 0); // priority
        push_u16(&mut h, 0); // language
        push_u32(&mut h, 0); // initial frames
        push_u32(&mut h, 1); // scale
        push_u32(&mut h, self.fps); // rate: fps = rate / scale
        push_u32(&mut h, 0); // start
        push_u32(&mut h, num_frames); // length in frames
        push_u32(&mut h, max_frame); // suggested buffer size
        push_u32(&mut h, u32::MAX); // quality: default
        push_u32(&mut h, 0); // sample size: varies per frame
        push_u16(&mut h, 0); // rcFrame
        push_u16(&mut h, 0);
        push_u16(&mut h, self.width as u16);
        push_u16(&mut h, self.height as u16);
        h
    }

    /// The 40-byte `strf` BITMAPINFOHEADER payload.
    fn bitmap_info(&self) -> Vec<u8> {
        let mut h = Vec::with_capacity(40);
        push_u32(&mut h, 40); // header size
        push_u32(&mut h, self.width);
        push_u32(&mut h, self.height);
        push_u16(&mut h, 1); // planes
        push_u16(&mut h, 24); // bits per pixel
        push_fourcc(&mut h, b"MJPG"); // compression
        push_u32(&mut h, self.width * self.height * 3); // image size
        push_u32(&mut h, 0); // x pixels per metre
        push_u32(&mut h, 0); // y pixels per metre
        push_u32(&mut h, 0); // colours used
        push_u32(&mut h, 0); // colours important
        h
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
