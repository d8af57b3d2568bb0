// src/violation/engine.rs
//
// Per-frame violation state machine.
//
// Each tracked vehicle moves through:
//
//   UNSEEN ──first red sample──▶ TRACKED ──crossing on RED──▶ RECORDED
//                               ▲                            │
//                               └──── flash expires ◀── FLASHING
//
// RECORDED is terminal for violations (the ledger holds the id), but the
// vehicle keeps being tracked and counted. Detections without a track id
// are only counted and drawn.

use super::flash::FlashScheduler;
use super::ledger::ViolationLedger;
use super::signal_phase::{SignalPhase, SignalPhaseOracle};
use super::track_history::TrackHistory;
use crate::snapshot::SnapshotStore;
use crate::types::{Config, Detection, Frame, TrackId, ViolationEvent};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub target_classes: HashSet<usize>,
    pub confidence_threshold: f32,
    pub line_y_threshold: i32,
    pub reference_offset: i32,
    pub flash_duration_frames: u32,
    pub red_light_start_time: f64,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_classes: config.detection.target_classes.iter().copied().collect(),
            confidence_threshold: config.detection.confidence_threshold,
            line_y_threshold: config.violation.line_y_threshold,
            reference_offset: config.violation.reference_offset,
            flash_duration_frames: config.violation.flash_duration_frames,
            red_light_start_time: config.signal.red_light_start_time,
        }
    }

    fn qualifies(&self, det: &Detection) -> bool {
        self.target_classes.contains(&det.class_id) && det.confidence >= self.confidence_threshold
    }
}

/// What the renderer needs to know about one vehicle on this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleOverlay {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub track_id: Option<TrackId>,
    pub flashing: bool,
}

#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub phase: SignalPhase,
    pub line_y: i32,
    pub vehicles: Vec<VehicleOverlay>,
    /// Qualifying detections on this frame, tracked or not.
    pub active_vehicles: usize,
    /// Running total for the session.
    pub violation_count: usize,
    pub new_violations: Vec<ViolationEvent>,
    pub tracking: bool,
}

pub struct FrameViolationEngine {
    settings: EngineSettings,
    oracle: SignalPhaseOracle,
    history: TrackHistory,
    ledger: ViolationLedger,
    flash: FlashScheduler,
    snapshots: Box<dyn SnapshotStore>,
    warned_untracked: bool,
}

impl FrameViolationEngine {
    pub fn new(settings: EngineSettings, snapshots: Box<dyn SnapshotStore>) -> Self {
        Self {
            oracle: SignalPhaseOracle::new(settings.red_light_start_time),
            history: TrackHistory::new(settings.line_y_threshold),
            ledger: ViolationLedger::new(),
            flash: FlashScheduler::new(settings.flash_duration_frames),
            snapshots,
            settings,
            warned_untracked: false,
        }
    }

    pub fn process(&mut self, frame: &Frame, detections: &[Detection]) -> FrameOutcome {
        let phase = self.oracle.phase(frame.timestamp_secs());

        let qualifying: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.settings.qualifies(d))
            .collect();

        let tracking = qualifying.iter().any(|d| d.track_id.is_some());
        if !tracking && !qualifying.is_empty() && !self.warned_untracked {
            warn!("Detector returned no track ids: counting only, violation checks disabled");
            self.warned_untracked = true;
        }

        let mut vehicles = Vec::with_capacity(qualifying.len());
        let mut new_violations = Vec::new();

        for det in &qualifying {
            let flashing = match det.track_id {
                Some(id) => {
                    // Samples taken on green never pair with a red one.
                    if phase.is_red() {
                        self.history
                            .record(id, det.reference_y(self.settings.reference_offset));

                        if self.history.has_crossed(id) && self.ledger.should_record(id) {
                            let event = self.record_violation(frame, det, id);
                            new_violations.push(event);
                        }
                    }

                    self.flash.should_flash(id)
                }
                None => false,
            };

            vehicles.push(VehicleOverlay {
                bbox: det.bbox,
                class_id: det.class_id,
                track_id: det.track_id,
                flashing,
            });
        }

        debug!(
            "Frame {}: {} | {} vehicle(s), {} tracked | {} new violation(s), {} flashing",
            frame.index,
            phase.as_str(),
            vehicles.len(),
            self.tracked_vehicles(),
            new_violations.len(),
            self.flash.active_count()
        );

        FrameOutcome {
            frame_index: frame.index,
            phase,
            line_y: self.settings.line_y_threshold,
            active_vehicles: vehicles.len(),
            vehicles,
            violation_count: self.ledger.len(),
            new_violations,
            tracking,
        }
    }

    fn record_violation(&mut self, frame: &Frame, det: &Detection, id: TrackId) -> ViolationEvent {
        let now = chrono::Local::now();

        let image_path = match self.snapshots.save(frame, det.bbox, id, now) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    "Failed to save snapshot for vehicle #{}: {:#}. Keeping the violation.",
                    id, e
                );
                None
            }
        };

        let event = ViolationEvent {
            vehicle_id: id,
            timestamp: now,
            bbox: det.bbox,
            image_path,
            frame_index: frame.index,
            video_time_s: frame.timestamp_secs(),
        };

        self.ledger.record(event.clone());
        self.flash.trigger(id);

        info!(
            "🚨 Violation #{}: vehicle #{} crossed y={} on RED at {:.2}s (frame {})",
            self.ledger.len(),
            id,
            self.history.line_y_threshold(),
            event.video_time_s,
            frame.index
        );

        event
    }

    pub fn violation_count(&self) -> usize {
        self.ledger.len()
    }

    #[cfg(test)]
    pub fn violations(&self) -> &[ViolationEvent] {
        self.ledger.events()
    }

    pub fn into_violations(self) -> Vec<ViolationEvent> {
        self.ledger.into_events()
    }

    pub fn tracked_vehicles(&self) -> usize {
        self.history.tracked_count()
    }
}
