use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use tracing::warn;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        Ok(config)
    }

    /// Checked once before any session starts. Sessions assume a valid config.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let det = &self.detection;
        if det.frame_skip < 1 {
            errors.push("detection.frame_skip must be >= 1".to_string());
        }
        if !(0.1..=1.0).contains(&det.confidence_threshold) {
            errors.push(format!(
                "detection.confidence_threshold must be in [0.1, 1.0], got {}",
                det.confidence_threshold
            ));
        }
        if det.target_classes.is_empty() {
            errors.push("detection.target_classes must not be empty".to_string());
        }
        if !(det.iou_threshold > 0.0 && det.iou_threshold < 1.0) {
            errors.push(format!(
                "detection.iou_threshold must be in (0, 1), got {}",
                det.iou_threshold
            ));
        }
        if det.max_missed_frames < 1 {
            errors.push("detection.max_missed_frames must be >= 1".to_string());
        }

        let red = self.signal.red_light_start_time;
        if !red.is_finite() || red < 0.0 {
            errors.push(format!(
                "signal.red_light_start_time must be a non-negative number, got {}",
                red
            ));
        }

        let vio = &self.violation;
        if vio.line_y_threshold < 0 {
            errors.push("violation.line_y_threshold must be >= 0".to_string());
        }
        if vio.reference_offset < 0 {
            errors.push("violation.reference_offset must be >= 0".to_string());
        }
        if vio.flash_duration_frames < 1 {
            errors.push("violation.flash_duration_frames must be >= 1".to_string());
        }

        let (w, h) = self.video.output_resolution;
        if w == 0 || h == 0 {
            errors.push(format!("video.output_resolution must be positive, got {}x{}", w, h));
        } else if vio.line_y_threshold >= h as i32 {
            warn!(
                "Stop line at y={} lies below the {}px output frame; no crossing can fire",
                vio.line_y_threshold, h
            );
        }

        if self.model.num_threads < 1 {
            errors.push("model.num_threads must be >= 1".to_string());
        }

        if !errors.is_empty() {
            bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }
}
