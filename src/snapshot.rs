// src/snapshot.rs
//
// Evidence crops for violation events. The crop is padded around the
// vehicle bbox and clamped to the frame, then JPEG-encoded with `image`.

use crate::types::{Frame, TrackId};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

const JPEG_QUALITY: u8 = 90;

pub trait SnapshotStore: Send {
    /// Persist a crop of `frame` around `bbox`, returning the written path.
    fn save(
        &mut self,
        frame: &Frame,
        bbox: [f32; 4],
        vehicle_id: TrackId,
        captured_at: DateTime<Local>,
    ) -> Result<PathBuf>;
}

pub struct JpegSnapshotStore {
    dir: PathBuf,
    padding: u32,
}

impl JpegSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, padding: u32) -> Self {
        Self {
            dir: dir.into(),
            padding,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotStore for JpegSnapshotStore {
    fn save(
        &mut self,
        frame: &Frame,
        bbox: [f32; 4],
        vehicle_id: TrackId,
        captured_at: DateTime<Local>,
    ) -> Result<PathBuf> {
        let (x, y, w, h) = padded_crop(bbox, self.padding, frame.width, frame.height)
            .with_context(|| format!("Empty crop for vehicle #{} at {:?}", vehicle_id, bbox))?;

        let jpeg = encode_crop_to_jpeg(frame, x, y, w, h)?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(snapshot_file_name(vehicle_id, captured_at));
        fs::write(&path, jpeg).with_context(|| format!("Failed to write {}", path.display()))?;

        info!("📸 Violation snapshot saved: {}", path.display());
        Ok(path)
    }
}

/// `violation_{id}_{YYYYmmdd_HHMMSS_micros}.jpg`
pub fn snapshot_file_name(vehicle_id: TrackId, captured_at: DateTime<Local>) -> String {
    format!(
        "violation_{}_{}.jpg",
        vehicle_id,
        captured_at.format("%Y%m%d_%H%M%S_%6f")
    )
}

/// Pads the bbox by `padding` on every side and clamps it to the frame.
/// Returns `(x, y, width, height)` or `None` when nothing is left.
pub fn padded_crop(
    bbox: [f32; 4],
    padding: u32,
    frame_width: usize,
    frame_height: usize,
) -> Option<(u32, u32, u32, u32)> {
    let pad = padding as i64;
    let x1 = (bbox[0] as i64 - pad).max(0);
    let y1 = (bbox[1] as i64 - pad).max(0);
    let x2 = (bbox[2] as i64 + pad).min(frame_width as i64);
    let y2 = (bbox[3] as i64 + pad).min(frame_height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

fn encode_crop_to_jpeg(frame: &Frame, x: u32, y: u32, w: u32, h: u32) -> Result<Vec<u8>> {
    use image::{imageops, ImageBuffer, RgbImage};

    let expected_len = frame.width * frame.height * 3;
    if frame.data.len() < expected_len {
        bail!(
            "Frame buffer too short: {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        );
    }

    let img: RgbImage = ImageBuffer::from_raw(
        frame.width as u32,
        frame.height as u32,
        frame.data[..expected_len].to_vec(),
    )
    .context("Frame dimensions do not match buffer")?;
    let crop = imageops::crop_imm(&img, x, y, w, h).to_image();

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    crop.write_with_encoder(encoder)
        .context("JPEG encoding failed")?;
    Ok(buf.into_inner())
}
