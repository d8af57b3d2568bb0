// src/main.rs

mod config;
mod pipeline;
mod snapshot;
mod types;
mod vehicle_detection;
mod vehicle_tracker;
mod video_processor;
mod violation;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use pipeline::SessionHandle;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use vehicle_detection::{SharedDetector, VehicleDetector, YoloDetector};
use vehicle_tracker::{IouTracker, TrackingDetector};

const PROGRESS_POLL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "redlight_detection={},ort=warn",
            config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Red Light Violation Detection Starting");
    config.validate()?;
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Detection: frame_skip={}, confidence={:.2}, tracking={} | red after {:.1}s | stop line y={}",
        config.detection.frame_skip,
        config.detection.confidence_threshold,
        config.detection.tracking,
        config.signal.red_light_start_time,
        config.violation.line_y_threshold
    );

    let video_processor = video_processor::VideoProcessor::new(config.clone());
    let video_files = video_processor.find_video_files()?;

    if video_files.is_empty() {
        error!("No video files found in {}", config.video.input_dir);
        return Ok(());
    }

    info!("Found {} video file(s) to process", video_files.len());

    let model = SharedDetector::new(YoloDetector::new(
        &config.model.path,
        config.model.num_threads,
        &config.detection.target_classes,
        config.detection.confidence_threshold,
    )?);
    info!("✓ YOLO vehicle detector ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing current video and stopping");
                shutdown.store(true, Ordering::Relaxed);
            }
        })
    };

    let mut total_violations = 0usize;
    let mut processed = 0usize;
    let mut failed = 0usize;

    for (idx, video_path) in pending_videos(&video_files, &shutdown) {
        info!("\n========================================");
        info!(
            "Processing video {}/{}: {}",
            idx + 1,
            video_files.len(),
            video_path.display()
        );
        info!("========================================\n");

        let detector = session_detector(&model, &config);
        match process_video(video_path, &config, detector, shutdown.clone()).await {
            Ok(violations) => {
                processed += 1;
                total_violations += violations;
            }
            Err(e) => {
                failed += 1;
                error!("Error processing video {}: {:#}", video_path.display(), e);
            }
        }
    }
    interrupt.abort();

    info!("\n📊 Final Report:");
    info!("  Videos processed: {}", processed);
    if failed > 0 {
        warn!("  Videos failed: {}", failed);
    }
    let skipped = video_files.len() - processed - failed;
    if skipped > 0 {
        warn!("  Videos not started (interrupted): {}", skipped);
    }
    info!("  🚨 Total violations: {}", total_violations);
    info!("  Snapshots under: {}", config.violation.save_path);

    Ok(())
}

/// Videos left to run, ending at the first interrupt.
fn pending_videos<'a>(
    videos: &'a [PathBuf],
    shutdown: &'a AtomicBool,
) -> impl Iterator<Item = (usize, &'a PathBuf)> + 'a {
    videos
        .iter()
        .enumerate()
        .take_while(move |_| !shutdown.load(Ordering::Relaxed))
}

/// The model is loaded once; each video gets its own tracker so ids and
/// stale tracks never leak between videos.
fn session_detector<D: VehicleDetector + 'static>(
    model: &SharedDetector<D>,
    config: &Config,
) -> Box<dyn VehicleDetector> {
    if config.detection.tracking {
        let tracker = IouTracker::new(
            config.detection.iou_threshold,
            config.detection.max_missed_frames,
        );
        Box::new(TrackingDetector::new(model.clone(), tracker))
    } else {
        warn!("⚪ Tracking disabled, running in detection-only mode");
        Box::new(model.clone())
    }
}

async fn process_video(
    video_path: &Path,
    config: &Config,
    detector: Box<dyn VehicleDetector>,
    shutdown: Arc<AtomicBool>,
) -> Result<usize> {
    let handle = SessionHandle::spawn(config.clone(), video_path.to_path_buf(), detector, shutdown);

    let mut interval = tokio::time::interval(PROGRESS_POLL);
    while !handle.is_finished() {
        interval.tick().await;
        if handle.progress() > 0 {
            info!(
                "⏳ {:.1}% ({} frames decoded)",
                handle.percent(),
                handle.progress()
            );
        }
    }

    let report = handle.wait().await?;

    info!("\n✓ Video processed{}", if report.stopped_early { " (stopped early)" } else { "" });
    info!("  Total frames: {}", report.stats.frame_count);
    info!("  Processed frames: {}", report.stats.processed_frames);
    info!("  Skipped frames: {}", report.stats.skipped_frames);

    let red_frames = report.frame_stats.iter().filter(|s| s.phase.is_red()).count();
    let peak = report
        .frame_stats
        .iter()
        .max_by_key(|s| s.active_vehicles)
        .filter(|s| s.active_vehicles > 0);
    info!("  🔴 Frames analysed on RED: {}", red_frames);
    if let Some(s) = peak {
        info!(
            "  🚙 Peak vehicles: {} (frame {}, {} violation(s) so far)",
            s.active_vehicles, s.frame_index, s.violation_count
        );
    }
    info!("  🚨 Violations: {}", report.violations.len());
    for v in &report.violations {
        info!(
            "    Vehicle #{} at {:.2}s (frame {}) → {}",
            v.vehicle_id,
            v.video_time_s,
            v.frame_index,
            v.image_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "no snapshot".to_string())
        );
    }
    if let Some(path) = &report.summary_path {
        info!("  💾 Results: {}", path.display());
    }
    info!("  Processing Speed: {:.1} FPS", report.stats.processing_fps);

    Ok(report.violations.len())
}
