// src/violation/flash.rs

use crate::types::TrackId;
use std::collections::HashMap;
use tracing::debug;

/// Per-vehicle highlight countdown after a violation fires.
///
/// Continuous policy: the vehicle is highlighted on every frame it is seen
/// until the counter reaches `duration_frames`. There is no blink pattern.
pub struct FlashScheduler {
    duration_frames: u32,
    counters: HashMap<TrackId, u32>,
}

impl FlashScheduler {
    pub fn new(duration_frames: u32) -> Self {
        Self {
            duration_frames,
            counters: HashMap::new(),
        }
    }

    pub fn trigger(&mut self, track_id: TrackId) {
        self.counters.insert(track_id, 0);
    }

    /// Advances the counter. The call that brings it to `duration_frames`
    /// returns false and drops the entry.
    pub fn should_flash(&mut self, track_id: TrackId) -> bool {
        let Some(counter) = self.counters.get_mut(&track_id) else {
            return false;
        };
        *counter += 1;
        if *counter < self.duration_frames {
            return true;
        }
        self.counters.remove(&track_id);
        debug!("Flash expired for vehicle #{}", track_id);
        false
    }

    #[cfg(test)]
    pub fn is_active(&self, track_id: TrackId) -> bool {
        self.counters.contains_key(&track_id)
    }

    pub fn active_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untriggered_never_flashes() {
        let mut flash = FlashScheduler::new(5);
        assert!(!flash.should_flash(1));
        assert!(!flash.is_active(1));
    }

    #[test]
    fn test_expiry_boundary() {
        let duration = 60;
        let mut flash = FlashScheduler::new(duration);
        flash.trigger(4);
        for call in 1..duration {
            assert!(flash.should_flash(4), "call {} should flash", call);
        }
        // Call number `duration` brings the counter to the limit
        assert!(!flash.should_flash(4));
        assert!(!flash.is_active(4));
        assert!(!flash.should_flash(4));
    }

    #[test]
    fn test_duration_one_expires_on_first_call() {
        let mut flash = FlashScheduler::new(1);
        flash.trigger(2);
        assert!(flash.is_active(2));
        assert!(!flash.should_flash(2));
        assert_eq!(flash.active_count(), 0);
    }

    #[test]
    fn test_retrigger_resets_counter() {
        let mut flash = FlashScheduler::new(3);
        flash.trigger(1);
        assert!(flash.should_flash(1));
        assert!(flash.should_flash(1));
        flash.trigger(1);
        assert!(flash.should_flash(1));
        assert!(flash.should_flash(1));
        assert!(!flash.should_flash(1));
    }

    #[test]
    fn test_counters_are_per_vehicle() {
        let mut flash = FlashScheduler::new(2);
        flash.trigger(1);
        flash.trigger(2);
        assert!(flash.should_flash(1));
        assert!(!flash.should_flash(1));
        assert!(flash.should_flash(2));
        assert_eq!(flash.active_count(), 1);
    }
}
