use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier assigned by the external tracker. Read-only to the core.
pub type TrackId = u32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub signal: SignalConfig,
    pub violation: ViolationConfig,
    pub video: VideoConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Process only every Nth decoded frame.
    pub frame_skip: u32,
    pub confidence_threshold: f32,
    /// COCO class ids that count as vehicles.
    pub target_classes: Vec<usize>,
    /// Assign persistent track ids. Without them only counting runs.
    pub tracking: bool,
    pub iou_threshold: f32,
    pub max_missed_frames: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            frame_skip: 5,
            confidence_threshold: 0.5,
            target_classes: vec![0, 1, 2, 3, 4, 5, 7, 8, 9, 10, 11, 12],
            tracking: true,
            iou_threshold: 0.3,
            max_missed_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Playback second after which the light is red.
    pub red_light_start_time: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            red_light_start_time: 12.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationConfig {
    /// Stop-line pixel row, in output-resolution coordinates.
    pub line_y_threshold: i32,
    /// Subtracted from the bbox bottom edge to get the reference row.
    pub reference_offset: i32,
    pub flash_duration_frames: u32,
    pub snapshot_padding: u32,
    pub save_path: String,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            line_y_threshold: 310,
            reference_offset: 20,
            flash_duration_frames: 60,
            snapshot_padding: 20,
            save_path: "violations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    /// (width, height) every frame is resized to before detection.
    pub output_resolution: (u32, u32),
    pub save_annotated: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input_dir: "videos".to_string(),
            output_dir: "results".to_string(),
            output_resolution: (854, 480),
            save_annotated: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/yolov8n.onnx".to_string(),
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A decoded frame, RGB, already resized to the output resolution.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// 1-based count of decoded frames, including unsampled ones.
    pub index: u64,
    /// Playback position reported by the source. NaN when unavailable.
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in frame coordinates
    pub confidence: f32,
    pub class_id: usize,
    pub track_id: Option<TrackId>,
}

impl Detection {
    /// Bottom edge minus `offset`, truncated to a pixel row.
    pub fn reference_y(&self, offset: i32) -> i32 {
        self.bbox[3] as i32 - offset
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub vehicle_id: TrackId,
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub bbox: [f32; 4],
    /// `None` when the snapshot could not be written.
    pub image_path: Option<PathBuf>,
    pub frame_index: u64,
    pub video_time_s: f64,
}
