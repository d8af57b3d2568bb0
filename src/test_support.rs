// src/test_support.rs
//
// In-memory stand-ins for video, detector and snapshot I/O.

use crate::pipeline::{FrameSink, FrameSource};
use crate::snapshot::SnapshotStore;
use crate::types::{Detection, Frame, TrackId};
use crate::vehicle_detection::VehicleDetector;
use crate::violation::FrameOutcome;
use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const WIDTH: usize = 854;
pub const HEIGHT: usize = 480;

pub fn frame_at(index: u64, t_secs: f64) -> Frame {
    Frame {
        data: vec![0u8; WIDTH * HEIGHT * 3],
        width: WIDTH,
        height: HEIGHT,
        index,
        timestamp_ms: t_secs * 1000.0,
    }
}

/// Tracked detection whose bbox bottom edge sits on row `y2`.
pub fn det(track_id: TrackId, class_id: usize, y2: i32) -> Detection {
    let x1 = 100.0 + track_id as f32 * 150.0;
    Detection {
        bbox: [x1, y2 as f32 - 80.0, x1 + 120.0, y2 as f32],
        confidence: 0.8,
        class_id,
        track_id: Some(track_id),
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    pub saved: Vec<(TrackId, [f32; 4])>,
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(
        &mut self,
        _frame: &Frame,
        bbox: [f32; 4],
        vehicle_id: TrackId,
        captured_at: DateTime<Local>,
    ) -> Result<PathBuf> {
        self.saved.push((vehicle_id, bbox));
        Ok(PathBuf::from(format!(
            "memory/{}",
            crate::snapshot::snapshot_file_name(vehicle_id, captured_at)
        )))
    }
}

pub struct FailingSnapshotStore;

impl SnapshotStore for FailingSnapshotStore {
    fn save(&mut self, _: &Frame, _: [f32; 4], _: TrackId, _: DateTime<Local>) -> Result<PathBuf> {
        bail!("disk full")
    }
}

pub struct ScriptedDetector {
    script: VecDeque<Result<Vec<Detection>>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Result<Vec<Detection>>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl VehicleDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct ScriptedSource {
    frames: VecDeque<Result<Frame>>,
    fps: f64,
    total: u64,
    pub released: Arc<Mutex<bool>>,
    pub reads: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Result<Frame>>, fps: f64) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            fps,
            total,
            released: Arc::new(Mutex::new(false)),
            reads: Arc::new(Mutex::new(0)),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.total
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        *self.reads.lock().unwrap() += 1;
        match self.frames.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn release(&mut self) -> Result<()> {
        *self.released.lock().unwrap() = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub written: Arc<Mutex<Vec<(u64, usize, usize)>>>,
    pub released: Arc<Mutex<bool>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame: &Frame, outcome: &FrameOutcome) -> Result<()> {
        if self.fail {
            bail!("encoder rejected frame");
        }
        self.written
            .lock()
            .unwrap()
            .push((frame.index, outcome.active_vehicles, outcome.violation_count));
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        *self.released.lock().unwrap() = true;
        Ok(())
    }
}
