// src/video_processor.rs

use crate::pipeline::session::{FrameSink, FrameSource, VideoSession};
use crate::pipeline::results::video_stem;
use crate::types::{Config, Frame};
use crate::vehicle_detection::class_name;
use crate::violation::{FrameOutcome, SignalPhase};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Tried in order until one opens.
const OUTPUT_CODECS: [[char; 4]; 4] = [
    ['m', 'p', '4', 'v'],
    ['a', 'v', 'c', '1'],
    ['H', '2', '6', '4'],
    ['X', 'V', 'I', 'D'],
];

pub struct VideoProcessor {
    config: Config,
}

impl VideoProcessor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn find_video_files(&self) -> Result<Vec<PathBuf>> {
        let mut videos = Vec::new();

        let video_extensions = ["mp4", "avi", "mov", "mkv"];

        for entry in WalkDir::new(&self.config.video.input_dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_video = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| video_extensions.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_video {
                videos.push(path.to_path_buf());
            }
        }

        info!("Found {} video files", videos.len());
        Ok(videos)
    }

    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        if !path.exists() {
            bail!("Video file not found: {}", path.display());
        }
        info!("Opening video: {}", path.display());

        let path_str = path
            .to_str()
            .with_context(|| format!("Non UTF-8 video path: {}", path.display()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;

        if !cap.is_opened()? {
            bail!("Could not open video: {}", path.display());
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)?;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        if !(fps.is_finite() && fps > 0.0) {
            bail!("Video reports invalid FPS ({}): {}", fps, path.display());
        }

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames ({:.1}s)",
            width,
            height,
            fps,
            total_frames,
            total_frames / fps
        );

        let (out_w, out_h) = self.config.video.output_resolution;
        Ok(VideoReader {
            cap,
            fps,
            total_frames: total_frames.max(0.0) as u64,
            current_frame: 0,
            output_size: core::Size::new(out_w as i32, out_h as i32),
        })
    }

    /// `Ok(None)` when annotated output is disabled. Errors only after every
    /// codec in `OUTPUT_CODECS` failed to open.
    pub fn create_writer(&self, input_path: &Path, source_fps: f64) -> Result<Option<AnnotatedVideoWriter>> {
        if !self.config.video.save_annotated {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.config.video.output_dir)
            .with_context(|| format!("Failed to create {}", self.config.video.output_dir))?;

        let output_path = PathBuf::from(&self.config.video.output_dir)
            .join(format!("{}_annotated.mp4", video_stem(input_path)));
        let output_str = output_path
            .to_str()
            .with_context(|| format!("Non UTF-8 output path: {}", output_path.display()))?;

        let fps = VideoSession::output_fps(source_fps, self.config.detection.frame_skip);
        let (w, h) = self.config.video.output_resolution;
        let size = core::Size::new(w as i32, h as i32);

        for [a, b, c, d] in OUTPUT_CODECS {
            let codec: String = [a, b, c, d].iter().collect();
            let fourcc = VideoWriter::fourcc(a, b, c, d)?;
            match VideoWriter::new(output_str, fourcc, fps, size, true) {
                Ok(writer) if writer.is_opened().unwrap_or(false) => {
                    info!(
                        "Output video: {} ({} @ {:.1} FPS, {}x{})",
                        output_path.display(),
                        codec,
                        fps,
                        w,
                        h
                    );
                    return Ok(Some(AnnotatedVideoWriter { writer, size }));
                }
                Ok(_) => warn!("Codec {} could not open {}", codec, output_path.display()),
                Err(e) => warn!("Codec {} failed: {}", codec, e),
            }
        }

        bail!(
            "Could not create output video {} with any codec (tried mp4v, avc1, H264, XVID)",
            output_path.display()
        )
    }
}

pub struct VideoReader {
    cap: VideoCapture,
    fps: f64,
    total_frames: u64,
    current_frame: u64,
    output_size: core::Size,
}

impl FrameSource for VideoReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }
        self.current_frame += 1;

        let timestamp_ms = match VideoCaptureTraitConst::get(&self.cap, videoio::CAP_PROP_POS_MSEC) {
            Ok(ms) => ms,
            Err(e) => {
                warn!("Playback position unavailable on frame {}: {}", self.current_frame, e);
                f64::NAN
            }
        };

        let mut resized = Mat::default();
        imgproc::resize(
            &mat,
            &mut resized,
            self.output_size,
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame {
            data,
            width: self.output_size.width as usize,
            height: self.output_size.height as usize,
            index: self.current_frame,
            timestamp_ms,
        }))
    }

    fn release(&mut self) -> Result<()> {
        VideoCaptureTrait::release(&mut self.cap)?;
        Ok(())
    }
}

pub struct AnnotatedVideoWriter {
    writer: VideoWriter,
    size: core::Size,
}

impl FrameSink for AnnotatedVideoWriter {
    fn write(&mut self, frame: &Frame, outcome: &FrameOutcome) -> Result<()> {
        let annotated = draw_overlay(frame, outcome)?;
        if annotated.cols() != self.size.width || annotated.rows() != self.size.height {
            bail!(
                "Annotated frame is {}x{}, writer expects {}x{}",
                annotated.cols(),
                annotated.rows(),
                self.size.width,
                self.size.height
            );
        }
        VideoWriterTrait::write(&mut self.writer, &annotated)?;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        VideoWriterTrait::release(&mut self.writer)?;
        Ok(())
    }
}

fn scalar(b: f64, g: f64, r: f64) -> core::Scalar {
    core::Scalar::new(b, g, r, 0.0)
}

fn put_text(img: &mut Mat, text: &str, org: core::Point, scale: f64, color: core::Scalar, thickness: i32) -> Result<()> {
    imgproc::put_text(
        img,
        text,
        org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        color,
        thickness,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Boxes, stop line, traffic light and counters on a BGR copy of the frame.
pub fn draw_overlay(frame: &Frame, outcome: &FrameOutcome) -> Result<Mat> {
    let width = frame.width as i32;
    let height = frame.height as i32;

    let mat = Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, height)?;

    let mut bgr_mat = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;
    let mut output = bgr_mat.try_clone()?;

    let red = scalar(0.0, 0.0, 255.0);
    let green = scalar(0.0, 255.0, 0.0);
    let white = scalar(255.0, 255.0, 255.0);
    let black = scalar(0.0, 0.0, 0.0);

    // Vehicles
    for vehicle in &outcome.vehicles {
        let [x1, y1, x2, y2] = vehicle.bbox;
        let rect = core::Rect::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32);

        if vehicle.flashing {
            imgproc::rectangle(&mut output, rect, red, 4, imgproc::LINE_8, 0)?;
            put_text(
                &mut output,
                "VIOLATION!",
                core::Point::new(x2 as i32 - 80, y2 as i32 + 25),
                0.6,
                red,
                2,
            )?;
        } else {
            imgproc::rectangle(&mut output, rect, green, 2, imgproc::LINE_8, 0)?;
        }

        let label = match vehicle.track_id {
            Some(id) => format!("{} #{}", class_name(vehicle.class_id), id),
            None => class_name(vehicle.class_id).to_string(),
        };
        put_text(
            &mut output,
            &label,
            core::Point::new(x1 as i32, (y1 as i32 - 6).max(12)),
            0.5,
            if vehicle.flashing { red } else { green },
            1,
        )?;
    }

    // Stop line
    imgproc::line(
        &mut output,
        core::Point::new(10, outcome.line_y),
        core::Point::new(width - 10, outcome.line_y),
        red,
        2,
        imgproc::LINE_AA,
        0,
    )?;

    // Traffic light
    let is_red = outcome.phase == SignalPhase::Red;
    let light_box = core::Rect::new(width - 80, 10, 70, 70);
    imgproc::rectangle(&mut output, light_box, black, -1, imgproc::LINE_8, 0)?;
    imgproc::rectangle(&mut output, light_box, white, 2, imgproc::LINE_8, 0)?;
    imgproc::circle(
        &mut output,
        core::Point::new(width - 45, 45),
        20,
        if is_red { red } else { green },
        -1,
        imgproc::LINE_8,
        0,
    )?;
    put_text(
        &mut output,
        outcome.phase.as_str(),
        core::Point::new(width - 78, 100),
        0.6,
        if is_red { red } else { green },
        2,
    )?;

    // Counters
    let stats_box = core::Rect::new(5, 4, 270, 61);
    imgproc::rectangle(&mut output, stats_box, white, -1, imgproc::LINE_8, 0)?;
    imgproc::rectangle(&mut output, stats_box, black, 2, imgproc::LINE_8, 0)?;
    put_text(
        &mut output,
        &format!("Active Vehicles: {}", outcome.active_vehicles),
        core::Point::new(25, 20),
        0.6,
        black,
        2,
    )?;
    put_text(
        &mut output,
        &format!("Violations: {}", outcome.violation_count),
        core::Point::new(25, 40),
        0.6,
        black,
        2,
    )?;
    put_text(
        &mut output,
        &format!("Light: {}", outcome.phase.as_str()),
        core::Point::new(25, 60),
        0.6,
        if is_red { red } else { green },
        2,
    )?;

    if !outcome.tracking && outcome.active_vehicles > 0 {
        put_text(
            &mut output,
            "DETECTION ONLY",
            core::Point::new(10, height - 12),
            0.5,
            white,
            1,
        )?;
    }

    Ok(output)
}
