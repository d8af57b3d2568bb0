// src/violation/track_history.rs

use crate::types::TrackId;
use std::collections::HashMap;

/// Per-track reference rows in processing order. Never truncated; one
/// video is processed at a time so growth is bounded by its length.
pub struct TrackHistory {
    line_y_threshold: i32,
    samples: HashMap<TrackId, Vec<i32>>,
}

impl TrackHistory {
    pub fn new(line_y_threshold: i32) -> Self {
        Self {
            line_y_threshold,
            samples: HashMap::new(),
        }
    }

    pub fn record(&mut self, track_id: TrackId, reference_y: i32) {
        self.samples.entry(track_id).or_default().push(reference_y);
    }

    /// True when the two latest samples straddle the line:
    /// `prev < threshold <= curr`.
    pub fn has_crossed(&self, track_id: TrackId) -> bool {
        let Some(history) = self.samples.get(&track_id) else {
            return false;
        };
        match history.as_slice() {
            [.., prev, curr] => *prev < self.line_y_threshold && *curr >= self.line_y_threshold,
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn samples(&self, track_id: TrackId) -> &[i32] {
        self.samples
            .get(&track_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tracked_count(&self) -> usize {
        self.samples.len()
    }

    pub fn line_y_threshold(&self) -> i32 {
        self.line_y_threshold
    }
}
