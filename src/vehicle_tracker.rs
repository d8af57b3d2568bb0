// src/vehicle_tracker.rs
//
// Greedy IoU tracker standing in for the detector's tracking mode.
// It only assigns ids; the violation engine treats them as opaque keys.

use crate::types::{Detection, Frame, TrackId};
use crate::vehicle_detection::{iou, VehicleDetector};
use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct TrackedVehicle {
    bbox: [f32; 4],
    class_id: usize,
    last_seen_update: u64,
}

pub struct IouTracker {
    next_id: TrackId,
    tracks: BTreeMap<TrackId, TrackedVehicle>,
    iou_threshold: f32,
    max_missed: u64,
    updates: u64,
}

impl IouTracker {
    pub fn new(iou_threshold: f32, max_missed: u64) -> Self {
        Self {
            next_id: 1,
            tracks: BTreeMap::new(),
            iou_threshold,
            max_missed,
            updates: 0,
        }
    }

    /// Fills `track_id` on every detection. Highest-confidence detections
    /// claim tracks first; a track is matched at most once per update.
    pub fn assign(&mut self, detections: &mut [Detection]) {
        self.updates += 1;

        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|&a, &b| detections[b].confidence.total_cmp(&detections[a].confidence));

        let mut claimed: HashSet<TrackId> = HashSet::new();

        for idx in order {
            let det = &mut detections[idx];

            let best = self
                .tracks
                .iter()
                .filter(|(id, t)| t.class_id == det.class_id && !claimed.contains(*id))
                .map(|(id, t)| (*id, iou(&t.bbox, &det.bbox)))
                .filter(|(_, score)| *score > self.iou_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let id = match best {
                Some((id, _)) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    info!("🆕 New vehicle tracked: ID #{}", id);
                    id
                }
            };

            self.tracks.insert(
                id,
                TrackedVehicle {
                    bbox: det.bbox,
                    class_id: det.class_id,
                    last_seen_update: self.updates,
                },
            );
            claimed.insert(id);
            det.track_id = Some(id);
        }

        let updates = self.updates;
        let max_missed = self.max_missed;
        let before = self.tracks.len();
        self.tracks
            .retain(|_, t| updates - t.last_seen_update <= max_missed);
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!("Removed {} stale track(s)", removed);
        }
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

/// Wraps any detector and adds persistent track ids to its output.
pub struct TrackingDetector<D: VehicleDetector> {
    inner: D,
    tracker: IouTracker,
}

impl<D: VehicleDetector> TrackingDetector<D> {
    pub fn new(inner: D, tracker: IouTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<D: VehicleDetector> VehicleDetector for TrackingDetector<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = self.inner.detect(frame)?;
        self.tracker.assign(&mut detections);
        debug!(
            "Tracker: {} detection(s), {} live track(s)",
            detections.len(),
            self.tracker.active_tracks()
        );
        Ok(detections)
    }
}
