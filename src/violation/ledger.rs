// src/violation/ledger.rs
//
// Append-only store of violation events with a seen-set guard.
// A vehicle that hovers around the line still produces one event.

use crate::types::{TrackId, ViolationEvent};
use std::collections::HashSet;
use tracing::warn;

#[derive(Default)]
pub struct ViolationLedger {
    seen: HashSet<TrackId>,
    events: Vec<ViolationEvent>,
}

impl ViolationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_record(&self, track_id: TrackId) -> bool {
        !self.seen.contains(&track_id)
    }

    /// Appends the event and marks its vehicle as seen. Returns false and
    /// drops the event if the vehicle was already recorded.
    pub fn record(&mut self, event: ViolationEvent) -> bool {
        if !self.seen.insert(event.vehicle_id) {
            warn!(
                "Vehicle #{} already has a violation on record, ignoring duplicate",
                event.vehicle_id
            );
            return false;
        }
        self.events.push(event);
        true
    }

    #[cfg(test)]
    pub fn events(&self) -> &[ViolationEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<ViolationEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn event(vehicle_id: TrackId) -> ViolationEvent {
        ViolationEvent {
            vehicle_id,
            timestamp: chrono::Local::now(),
            bbox: [10.0, 20.0, 110.0, 330.0],
            image_path: Some(PathBuf::from(format!("violation_{}.jpg", vehicle_id))),
            frame_index: 40,
            video_time_s: 13.2,
        }
    }

    #[test]
    fn test_records_once_per_vehicle() {
        let mut ledger = ViolationLedger::new();
        assert!(ledger.should_record(7));
        assert!(ledger.record(event(7)));
        assert!(!ledger.should_record(7));
        assert!(!ledger.record(event(7)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_distinct_vehicles_are_kept_in_order() {
        let mut ledger = ViolationLedger::new();
        ledger.record(event(3));
        ledger.record(event(1));
        let ids: Vec<TrackId> = ledger.events().iter().map(|e| e.vehicle_id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(ledger.should_record(2));
    }

    #[test]
    fn test_event_without_image_is_still_recorded() {
        let mut ledger = ViolationLedger::new();
        let mut e = event(9);
        e.image_path = None;
        assert!(ledger.record(e));
        assert!(ledger.events()[0].image_path.is_none());
        assert!(!ledger.is_empty());
    }
}
