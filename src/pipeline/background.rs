// src/pipeline/background.rs
//
// Runs a session's frame loop on the blocking pool. The only shared
// state is the progress counters and the join handle carrying the result.

use super::metrics::SessionMetrics;
use super::session::{SessionReport, VideoSession};
use crate::types::Config;
use crate::vehicle_detection::VehicleDetector;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct SessionHandle {
    metrics: SessionMetrics,
    task: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    /// Runs the session on the blocking pool. The session watches `stop`,
    /// which the caller may share across sessions.
    pub fn spawn(
        config: Config,
        video_path: PathBuf,
        detector: Box<dyn VehicleDetector>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let metrics = SessionMetrics::new();

        let task_metrics = metrics.clone();
        let task = tokio::task::spawn_blocking(move || {
            let session = VideoSession::open(&config, &video_path, detector)?
                .with_metrics(task_metrics)
                .with_stop_flag(stop);
            Ok(session.run())
        });

        Self { metrics, task }
    }

    /// Decoded frames so far.
    pub fn progress(&self) -> u64 {
        self.metrics.progress()
    }

    pub fn percent(&self) -> f32 {
        self.metrics.percent()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<SessionReport> {
        self.task.await.context("Session task panicked")?
    }
}
