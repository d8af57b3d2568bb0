// src/violation/signal_phase.rs
//
// Signal phase derived from playback time. There is no camera on the
// light itself: the phase turns red at a configured second and stays red.

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalPhase {
    Green,
    Red,
}

impl SignalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Red => "RED",
        }
    }

    pub fn is_red(&self) -> bool {
        matches!(self, Self::Red)
    }
}

pub struct SignalPhaseOracle {
    red_light_start_time: f64,
}

impl SignalPhaseOracle {
    pub fn new(red_light_start_time: f64) -> Self {
        Self {
            red_light_start_time,
        }
    }

    /// Red strictly after the start time. An unusable time reads as green
    /// so a broken clock can never produce violations.
    pub fn is_red(&self, current_time_seconds: f64) -> bool {
        if !current_time_seconds.is_finite() || current_time_seconds < 0.0 {
            warn!(
                "Invalid playback time {:?}, treating signal as GREEN",
                current_time_seconds
            );
            return false;
        }
        current_time_seconds > self.red_light_start_time
    }

    pub fn phase(&self, current_time_seconds: f64) -> SignalPhase {
        if self.is_red(current_time_seconds) {
            SignalPhase::Red
        } else {
            SignalPhase::Green
        }
    }
}
