// src/pipeline/results.rs
//
// Per-video results summary, written once when a session ends.

use super::metrics::SessionStats;
use crate::types::{Config, ViolationEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary<'a> {
    pub generated_at: chrono::DateTime<chrono::Local>,
    pub source: String,
    pub total_violations: usize,
    pub violations: &'a [ViolationEvent],
    pub stats: &'a SessionStats,
    pub config: &'a Config,
}

pub fn summary_path(output_dir: &str, video_path: &Path) -> PathBuf {
    let stem = video_stem(video_path);
    Path::new(output_dir).join(format!("{}_results.json", stem))
}

pub fn video_stem(video_path: &Path) -> String {
    video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string())
}

pub fn write_summary(path: &Path, summary: &ResultsSummary<'_>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("💾 Results saved to: {}", path.display());
    Ok(())
}
