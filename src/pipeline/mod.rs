// src/pipeline/mod.rs

pub mod background;
pub mod metrics;
pub mod results;
pub mod session;

pub use background::SessionHandle;
pub use session::{FrameSink, FrameSource};
