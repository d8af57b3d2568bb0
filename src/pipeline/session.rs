// src/pipeline/session.rs
//
// Drives one video end to end: pull frame → sample → detect → engine →
// write annotated frame. Only opening the input or output can fail the
// session; everything after that degrades to a skipped frame.

use super::metrics::{SessionMetrics, SessionStats};
use super::results::{summary_path, video_stem, write_summary, ResultsSummary};
use crate::snapshot::{JpegSnapshotStore, SnapshotStore};
use crate::types::{Config, Frame, ViolationEvent};
use crate::vehicle_detection::VehicleDetector;
use crate::video_processor::VideoProcessor;
use crate::violation::{EngineSettings, FrameOutcome, FrameViolationEngine, SignalPhase};
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Consecutive read failures after which the source counts as exhausted.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;
const PROGRESS_LOG_EVERY: u64 = 10;

pub trait FrameSource {
    fn fps(&self) -> f64;
    /// Frame count reported by the container, 0 when unknown.
    fn total_frames(&self) -> u64;
    fn read_frame(&mut self) -> Result<Option<Frame>>;
    fn release(&mut self) -> Result<()>;
}

pub trait FrameSink {
    fn write(&mut self, frame: &Frame, outcome: &FrameOutcome) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    ReadFailed(String),
    DetectionFailed(String),
    WriteFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed(e) => write!(f, "frame read failed: {}", e),
            Self::DetectionFailed(e) => write!(f, "detection failed: {}", e),
            Self::WriteFailed(e) => write!(f, "output write failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub phase: SignalPhase,
    pub active_vehicles: usize,
    pub violation_count: usize,
    pub new_violations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameResult {
    Processed(FrameStats),
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub source: String,
    pub stats: SessionStats,
    pub violations: Vec<ViolationEvent>,
    pub frame_stats: Vec<FrameStats>,
    pub summary_path: Option<PathBuf>,
    pub stopped_early: bool,
}

pub struct VideoSession {
    config: Config,
    source_name: String,
    source: Box<dyn FrameSource>,
    sink: Option<Box<dyn FrameSink>>,
    detector: Box<dyn VehicleDetector>,
    engine: FrameViolationEngine,
    metrics: SessionMetrics,
    stop: Arc<AtomicBool>,
    summary_path: Option<PathBuf>,
    frame_skip: u64,
}

impl VideoSession {
    /// Opens the video and its annotated-output writer. Either failing
    /// aborts here, before any frame is processed.
    pub fn open(config: &Config, video_path: &Path, detector: Box<dyn VehicleDetector>) -> Result<Self> {
        let processor = VideoProcessor::new(config.clone());
        let reader = processor.open_video(video_path)?;

        Self::open_with(
            config,
            video_path,
            Box::new(reader),
            |fps| {
                Ok(processor
                    .create_writer(video_path, fps)?
                    .map(|w| Box::new(w) as Box<dyn FrameSink>))
            },
            detector,
        )
    }

    /// Builds a session around an already opened source. `make_sink` gets
    /// the source fps; if it fails the source is released and no frame is read.
    pub fn open_with<F>(
        config: &Config,
        video_path: &Path,
        mut source: Box<dyn FrameSource>,
        make_sink: F,
        detector: Box<dyn VehicleDetector>,
    ) -> Result<Self>
    where
        F: FnOnce(f64) -> Result<Option<Box<dyn FrameSink>>>,
    {
        let sink = match make_sink(source.fps()) {
            Ok(sink) => sink,
            Err(e) => {
                if let Err(release_err) = source.release() {
                    warn!("Failed to release input after writer error: {}", release_err);
                }
                return Err(e.context(format!(
                    "Output writer unavailable for {}",
                    video_path.display()
                )));
            }
        };

        let snapshot_dir =
            Path::new(&config.violation.save_path).join(video_stem(video_path));
        let snapshots = JpegSnapshotStore::new(snapshot_dir, config.violation.snapshot_padding);
        info!("📁 Violation snapshots: {}", snapshots.dir().display());

        let session = Self::new(
            config.clone(),
            video_path.display().to_string(),
            source,
            sink,
            detector,
            Box::new(snapshots),
        )
        .with_summary_path(summary_path(&config.video.output_dir, video_path));

        Ok(session)
    }

    pub fn new(
        config: Config,
        source_name: String,
        source: Box<dyn FrameSource>,
        sink: Option<Box<dyn FrameSink>>,
        detector: Box<dyn VehicleDetector>,
        snapshots: Box<dyn SnapshotStore>,
    ) -> Self {
        let engine = FrameViolationEngine::new(EngineSettings::from_config(&config), snapshots);
        let frame_skip = u64::from(config.detection.frame_skip.max(1));
        Self {
            config,
            source_name,
            source,
            sink,
            detector,
            engine,
            metrics: SessionMetrics::new(),
            stop: Arc::new(AtomicBool::new(false)),
            summary_path: None,
            frame_skip,
        }
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_summary_path(mut self, path: PathBuf) -> Self {
        self.summary_path = Some(path);
        self
    }

    /// Output frame rate: source fps divided by the sampling step, at least 1.
    pub fn output_fps(fps: f64, frame_skip: u32) -> f64 {
        (fps / f64::from(frame_skip.max(1))).max(1.0)
    }

    pub fn run(mut self) -> SessionReport {
        self.metrics
            .set(&self.metrics.total_frames, self.source.total_frames());

        info!("🎬 Processing {}", self.source_name);
        info!(
            "   frame_skip={} | red after {:.1}s | stop line y={} | output {:?}",
            self.frame_skip,
            self.config.signal.red_light_start_time,
            self.config.violation.line_y_threshold,
            self.config.video.output_resolution
        );

        let mut decoded: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut frame_stats = Vec::new();
        let mut stopped_early = false;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("⏹ Stop requested after {} frames", decoded);
                stopped_early = true;
                break;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    consecutive_failures += 1;
                    self.record_skip(&SkipReason::ReadFailed(format!("{:#}", e)));
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        error!(
                            "{} consecutive read failures, treating source as exhausted",
                            consecutive_failures
                        );
                        break;
                    }
                    continue;
                }
            };
            consecutive_failures = 0;
            decoded += 1;
            self.metrics.inc(&self.metrics.decoded_frames);

            if decoded % self.frame_skip != 0 {
                continue;
            }

            match self.process_frame(&frame) {
                FrameResult::Processed(stats) => {
                    self.metrics.inc(&self.metrics.processed_frames);
                    frame_stats.push(stats);
                }
                FrameResult::Skipped(reason) => self.record_skip(&reason),
            }

            if decoded % (self.frame_skip * PROGRESS_LOG_EVERY) == 0 {
                info!(
                    "Progress: {:.1}% ({} frames, {} violation(s))",
                    self.metrics.percent(),
                    decoded,
                    self.engine.violation_count()
                );
            }
        }

        self.finish(frame_stats, stopped_early)
    }

    fn process_frame(&mut self, frame: &Frame) -> FrameResult {
        let detections = match self.detector.detect(frame) {
            Ok(d) => d,
            Err(e) => return FrameResult::Skipped(SkipReason::DetectionFailed(format!("{:#}", e))),
        };

        let outcome = self.engine.process(frame, &detections);
        self.metrics
            .set(&self.metrics.violations, outcome.violation_count as u64);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(frame, &outcome) {
                return FrameResult::Skipped(SkipReason::WriteFailed(format!("{:#}", e)));
            }
        }

        FrameResult::Processed(FrameStats {
            frame_index: frame.index,
            phase: outcome.phase,
            active_vehicles: outcome.active_vehicles,
            violation_count: outcome.violation_count,
            new_violations: outcome.new_violations.len(),
        })
    }

    fn record_skip(&self, reason: &SkipReason) {
        warn!("Skipping frame: {}", reason);
        self.metrics.inc(&self.metrics.skipped_frames);
    }

    /// Releases both ends and persists the summary. Runs on every exit path.
    fn finish(mut self, frame_stats: Vec<FrameStats>, stopped_early: bool) -> SessionReport {
        if let Err(e) = self.source.release() {
            warn!("Failed to release input: {}", e);
        }
        if let Some(sink) = self.sink.as_mut() {
            match sink.release() {
                Ok(()) => info!("✓ Output video finalized"),
                Err(e) => warn!("Failed to release output: {}", e),
            }
        }

        let stats = self.metrics.summary();
        let violations = self.engine.into_violations();

        let mut written = None;
        if let Some(path) = &self.summary_path {
            let summary = ResultsSummary {
                generated_at: chrono::Local::now(),
                source: self.source_name.clone(),
                total_violations: violations.len(),
                violations: &violations,
                stats: &stats,
                config: &self.config,
            };
            match write_summary(path, &summary) {
                Ok(()) => written = Some(path.clone()),
                Err(e) => error!("Failed to save results summary: {:#}", e),
            }
        }

        info!(
            "✓ {}: {} frames decoded, {} processed, {} skipped, {} violation(s) in {:.1}s",
            self.source_name,
            stats.frame_count,
            stats.processed_frames,
            stats.skipped_frames,
            violations.len(),
            stats.elapsed_secs
        );

        SessionReport {
            source: self.source_name,
            stats,
            violations,
            frame_stats,
            summary_path: written,
            stopped_early,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        det, frame_at, MemorySnapshotStore, RecordingSink, ScriptedDetector, ScriptedSource,
    };

    fn config() -> Config {
        let mut config = Config::default();
        config.detection.frame_skip = 1;
        config.signal.red_light_start_time = 12.0;
        config.violation.line_y_threshold = 310;
        config.violation.reference_offset = 20;
        config
    }

    /// One frame per entry at 5 fps starting at `t0` seconds.
    fn frames(count: usize, t0: f64) -> Vec<Result<Frame>> {
        (0..count)
            .map(|i| Ok(frame_at(i as u64 + 1, t0 + i as f64 * 0.2)))
            .collect()
    }

    fn session(
        config: Config,
        frames: Vec<Result<Frame>>,
        detections: Vec<Result<Vec<crate::types::Detection>>>,
        sink: Option<RecordingSink>,
    ) -> VideoSession {
        VideoSession::new(
            config,
            "synthetic.mp4".to_string(),
            Box::new(ScriptedSource::new(frames, 5.0)),
            sink.map(|s| Box::new(s) as Box<dyn FrameSink>),
            Box::new(ScriptedDetector::new(detections)),
            Box::new(MemorySnapshotStore::default()),
        )
    }

    fn track7(rows: &[i32]) -> Vec<Result<Vec<crate::types::Detection>>> {
        rows.iter().map(|&y| Ok(vec![det(7, 2, y + 20)])).collect()
    }

    #[test]
    fn test_red_phase_crossing_recorded_once() {
        let sink = RecordingSink::default();
        let written = sink.written.clone();
        let report = session(config(), frames(4, 13.0), track7(&[300, 305, 312, 320]), Some(sink)).run();

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].vehicle_id, 7);
        assert_eq!(report.violations[0].frame_index, 3);
        let new_per_frame: Vec<usize> = report.frame_stats.iter().map(|s| s.new_violations).collect();
        assert_eq!(new_per_frame, vec![0, 0, 1, 0]);
        assert_eq!(written.lock().unwrap().len(), 4);
        assert_eq!(report.stats.violation_count, 1);
    }

    #[test]
    fn test_green_phase_records_nothing() {
        let report = session(config(), frames(4, 2.0), track7(&[300, 305, 312, 320]), None).run();
        assert!(report.violations.is_empty());
        assert!(report
            .frame_stats
            .iter()
            .all(|s| s.phase == SignalPhase::Green));
    }

    #[test]
    fn test_frame_skip_samples_every_nth_decoded_frame() {
        let mut config = config();
        config.detection.frame_skip = 3;
        let detections = (0..3).map(|_| Ok(vec![det(1, 2, 100)])).collect();
        let report = session(config, frames(10, 0.0), detections, None).run();

        assert_eq!(report.stats.frame_count, 10);
        assert_eq!(report.stats.processed_frames, 3);
        let indices: Vec<u64> = report.frame_stats.iter().map(|s| s.frame_index).collect();
        assert_eq!(indices, vec![3, 6, 9]);
    }

    #[test]
    fn test_detection_failure_skips_frame_and_continues() {
        let detections = vec![
            Ok(vec![det(7, 2, 320)]),
            Err(anyhow::anyhow!("inference timeout")),
            Ok(vec![det(7, 2, 332)]),
        ];
        let report = session(config(), frames(3, 13.0), detections, None).run();

        assert_eq!(report.stats.processed_frames, 2);
        assert_eq!(report.stats.skipped_frames, 1);
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn test_read_failure_is_skipped() {
        let mut input = frames(3, 13.0);
        input.insert(1, Err(anyhow::anyhow!("corrupt packet")));
        let report = session(config(), input, track7(&[300, 320, 330]), None).run();

        assert_eq!(report.stats.frame_count, 3);
        assert_eq!(report.stats.skipped_frames, 1);
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn test_persistent_read_failures_end_session() {
        let input: Vec<Result<Frame>> = (0..100)
            .map(|_| Err(anyhow::anyhow!("device gone")))
            .collect();
        let report = session(config(), input, vec![], None).run();
        assert_eq!(report.stats.skipped_frames, u64::from(MAX_CONSECUTIVE_READ_FAILURES));
        assert_eq!(report.stats.frame_count, 0);
    }

    #[test]
    fn test_write_failure_skips_frame_but_keeps_violation() {
        let sink = RecordingSink::failing();
        let released = sink.released.clone();
        let report = session(config(), frames(2, 13.0), track7(&[300, 320]), Some(sink)).run();

        assert_eq!(report.stats.skipped_frames, 2);
        assert_eq!(report.violations.len(), 1);
        assert!(*released.lock().unwrap());
    }

    #[test]
    fn test_resources_released_and_summary_written() {
        let dir = std::env::temp_dir().join(format!("session-test-{}", uuid::Uuid::new_v4()));
        let summary = dir.join("synthetic_results.json");
        let sink = RecordingSink::default();
        let released = sink.released.clone();
        let source = ScriptedSource::new(frames(2, 13.0), 5.0);
        let source_released = source.released.clone();

        let report = VideoSession::new(
            config(),
            "synthetic.mp4".to_string(),
            Box::new(source),
            Some(Box::new(sink)),
            Box::new(ScriptedDetector::new(track7(&[300, 320]))),
            Box::new(MemorySnapshotStore::default()),
        )
        .with_summary_path(summary.clone())
        .run();

        assert!(*released.lock().unwrap());
        assert!(*source_released.lock().unwrap());
        assert_eq!(report.summary_path.as_deref(), Some(summary.as_path()));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(json["total_violations"], 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stop_flag_ends_loop_and_finalizes() {
        let stop = Arc::new(AtomicBool::new(true));
        let sink = RecordingSink::default();
        let released = sink.released.clone();
        let report = session(config(), frames(5, 13.0), track7(&[300; 5]), Some(sink))
            .with_stop_flag(stop)
            .run();

        assert!(report.stopped_early);
        assert_eq!(report.stats.frame_count, 0);
        assert!(*released.lock().unwrap());
    }

    struct InterruptingDetector {
        stop: Arc<AtomicBool>,
    }

    impl VehicleDetector for InterruptingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<crate::types::Detection>> {
            self.stop.store(true, Ordering::Relaxed);
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_interrupt_mid_video_stops_after_current_frame() {
        let stop = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink::default();
        let written = sink.written.clone();
        let report = VideoSession::new(
            config(),
            "synthetic.mp4".to_string(),
            Box::new(ScriptedSource::new(frames(5, 13.0), 5.0)),
            Some(Box::new(sink)),
            Box::new(InterruptingDetector { stop: stop.clone() }),
            Box::new(MemorySnapshotStore::default()),
        )
        .with_stop_flag(stop)
        .run();

        assert!(report.stopped_early);
        assert_eq!(report.stats.frame_count, 1);
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_two_vehicles_distinct_events() {
        let detections = vec![
            Ok(vec![det(1, 2, 300), det(2, 7, 290)]),
            Ok(vec![det(1, 2, 320), det(2, 7, 300)]),
            Ok(vec![det(1, 2, 340), det(2, 7, 330)]),
        ];
        let report = session(config(), frames(3, 13.0), detections, None).run();

        assert_eq!(report.violations.len(), 2);
        assert_ne!(report.violations[0].vehicle_id, report.violations[1].vehicle_id);
        assert_ne!(report.violations[0].image_path, report.violations[1].image_path);
    }

    #[test]
    fn test_writer_failure_releases_input_before_reading() {
        let dir = std::env::temp_dir().join(format!("session-test-{}", uuid::Uuid::new_v4()));
        let mut config = config();
        config.video.output_dir = dir.join("out").to_string_lossy().to_string();
        config.violation.save_path = dir.join("violations").to_string_lossy().to_string();

        let source = ScriptedSource::new(frames(3, 13.0), 25.0);
        let released = source.released.clone();
        let reads = source.reads.clone();
        let mut requested_fps = None;

        let result = VideoSession::open_with(
            &config,
            Path::new("clips/junction.mp4"),
            Box::new(source),
            |fps| {
                requested_fps = Some(fps);
                anyhow::bail!("no codec could open the output")
            },
            Box::new(ScriptedDetector::new(track7(&[300, 320, 330]))),
        );

        let err = result.err().unwrap();
        assert!(format!("{:#}", err).contains("no codec"));
        assert_eq!(requested_fps, Some(25.0));
        assert!(*released.lock().unwrap());
        assert_eq!(*reads.lock().unwrap(), 0);
        assert!(!dir.exists());
    }

    #[test]
    fn test_open_with_wires_sink_and_summary_path() {
        let mut config = config();
        config.video.output_dir = "out".to_string();
        let sink = RecordingSink::default();
        let written = sink.written.clone();

        let session = VideoSession::open_with(
            &config,
            Path::new("clips/junction.mp4"),
            Box::new(ScriptedSource::new(frames(2, 13.0), 5.0)),
            move |_| Ok(Some(Box::new(sink) as Box<dyn FrameSink>)),
            Box::new(ScriptedDetector::new(track7(&[300, 320]))),
        )
        .unwrap();

        assert_eq!(
            session.summary_path.as_deref(),
            Some(Path::new("out/junction_results.json"))
        );
        let dir = std::env::temp_dir().join(format!("session-test-{}", uuid::Uuid::new_v4()));
        let report = session
            .with_summary_path(dir.join("junction_results.json"))
            .run();
        assert_eq!(written.lock().unwrap().len(), 2);
        assert_eq!(report.violations.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_output_fps_floor() {
        assert_eq!(VideoSession::output_fps(30.0, 5), 6.0);
        assert_eq!(VideoSession::output_fps(4.0, 10), 1.0);
        assert_eq!(VideoSession::output_fps(25.0, 1), 25.0);
    }
}
