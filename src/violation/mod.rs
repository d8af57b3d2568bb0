// src/violation/mod.rs

pub mod engine;
pub mod flash;
pub mod ledger;
pub mod signal_phase;
pub mod track_history;

pub use engine::{EngineSettings, FrameOutcome, FrameViolationEngine};
pub use signal_phase::SignalPhase;
