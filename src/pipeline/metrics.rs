// src/pipeline/metrics.rs
//
// Session counters. Cloning shares the counters, so a foreground task
// can watch progress while the frame loop runs elsewhere.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub decoded_frames: Arc<AtomicU64>,
    pub processed_frames: Arc<AtomicU64>,
    pub skipped_frames: Arc<AtomicU64>,
    pub violations: Arc<AtomicU64>,
    pub total_frames: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            decoded_frames: Arc::new(AtomicU64::new(0)),
            processed_frames: Arc::new(AtomicU64::new(0)),
            skipped_frames: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            total_frames: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    /// Decoded frames so far. Only ever increases.
    pub fn progress(&self) -> u64 {
        self.decoded_frames.load(Ordering::Relaxed)
    }

    /// Percent of the container's frame count, 0 when the count is unknown.
    pub fn percent(&self) -> f32 {
        let total = self.total_frames.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.progress() as f32 / total as f32 * 100.0).min(100.0)
    }

    pub fn fps(&self) -> f64 {
        let frames = self.processed_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> SessionStats {
        SessionStats {
            frame_count: self.decoded_frames.load(Ordering::Relaxed),
            processed_frames: self.processed_frames.load(Ordering::Relaxed),
            skipped_frames: self.skipped_frames.load(Ordering::Relaxed),
            violation_count: self.violations.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
            processing_fps: self.fps(),
        }
    }
}

/// Read-only snapshot of a session's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub frame_count: u64,
    pub processed_frames: u64,
    pub skipped_frames: u64,
    pub violation_count: u64,
    pub elapsed_secs: f64,
    pub processing_fps: f64,
}
