// src/vehicle_detection.rs

use crate::types::{Detection, Frame};
use anyhow::{anyhow, bail, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_CLASSES: usize = 80;
const YOLO_PREDICTIONS: usize = 8400;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// The external detector boundary. Implementations may or may not assign
/// `track_id`; the engine handles both.
pub trait VehicleDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// A loaded model handed to successive sessions. Clones share the same
/// detector; sessions run one after another, so the lock is uncontended.
pub struct SharedDetector<D> {
    inner: Arc<Mutex<D>>,
}

impl<D: VehicleDetector> SharedDetector<D> {
    pub fn new(detector: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(detector)),
        }
    }
}

impl<D> Clone for SharedDetector<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: VehicleDetector> VehicleDetector for SharedDetector<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detector = self
            .inner
            .lock()
            .map_err(|_| anyhow!("Detector lock poisoned by an earlier session"))?;
        detector.detect(frame)
    }
}

pub struct YoloDetector {
    session: Session,
    target_classes: HashSet<usize>,
    confidence_threshold: f32,
}

impl YoloDetector {
    pub fn new(
        model_path: &str,
        num_threads: usize,
        target_classes: &[usize],
        confidence_threshold: f32,
    ) -> Result<Self> {
        info!("Loading YOLO model: {}", model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path))?;

        info!("✓ YOLO detector initialized");
        Ok(Self {
            session,
            target_classes: target_classes.iter().copied().collect(),
            confidence_threshold,
        })
    }

    fn preprocess(&self, src: &[u8], src_w: usize, src_h: usize) -> Result<(Vec<f32>, f32, f32, f32)> {
        if src.len() < src_w * src_h * 3 {
            bail!("Frame buffer too short for {}x{} RGB", src_w, src_h);
        }

        let target_size = YOLO_INPUT_SIZE;

        // Letterbox: fit inside 640x640 keeping aspect ratio
        let scale = (target_size as f32 / src_w as f32).min(target_size as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale) as usize).clamp(1, target_size);
        let scaled_h = ((src_h as f32 * scale) as usize).clamp(1, target_size);

        let pad_x = (target_size - scaled_w) as f32 / 2.0;
        let pad_y = (target_size - scaled_h) as f32 / 2.0;

        let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

        let mut canvas = vec![114u8; target_size * target_size * 3];
        for y in 0..scaled_h {
            let src_row = y * scaled_w * 3;
            let dst_row = ((y + pad_y as usize) * target_size + pad_x as usize) * 3;
            canvas[dst_row..dst_row + scaled_w * 3]
                .copy_from_slice(&resized[src_row..src_row + scaled_w * 3]);
        }

        // HWC u8 -> CHW f32 in [0, 1]
        let plane = target_size * target_size;
        let mut input = vec![0.0f32; 3 * plane];
        for (i, px) in canvas.chunks_exact(3).enumerate() {
            for c in 0..3 {
                input[c * plane + i] = px[c] as f32 / 255.0;
            }
        }

        Ok((input, scale, pad_x, pad_y))
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }

    fn postprocess(&self, output: &[f32], scale: f32, pad_x: f32, pad_y: f32) -> Result<Vec<Detection>> {
        let expected = YOLO_PREDICTIONS * (4 + YOLO_CLASSES);
        if output.len() < expected {
            bail!(
                "Unexpected YOLO output size {} (expected {})",
                output.len(),
                expected
            );
        }

        let mut detections = Vec::new();

        // Output [1, 84, 8400]: rows are cx, cy, w, h, then 80 class scores
        for i in 0..YOLO_PREDICTIONS {
            let cx = output[i];
            let cy = output[YOLO_PREDICTIONS + i];
            let w = output[YOLO_PREDICTIONS * 2 + i];
            let h = output[YOLO_PREDICTIONS * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..YOLO_CLASSES {
                let conf = output[YOLO_PREDICTIONS * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < self.confidence_threshold || !self.target_classes.contains(&best_class) {
                continue;
            }

            // Undo letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: max_conf,
                class_id: best_class,
                track_id: None,
            });
        }

        Ok(nms(detections, NMS_IOU_THRESHOLD))
    }
}

impl VehicleDetector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = self.preprocess(&frame.data, frame.width, frame.height)?;
        let output = self.infer(&input)?;
        let detections = self.postprocess(&output, scale, pad_x, pad_y)?;

        debug!("Detected {} object(s) on frame {}", detections.len(), frame.index);
        Ok(detections)
    }
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

pub fn class_name(class_id: usize) -> &'static str {
    match class_id {
        0 => "person",
        1 => "bicycle",
        2 => "car",
        3 => "motorcycle",
        4 => "airplane",
        5 => "bus",
        6 => "train",
        7 => "truck",
        8 => "boat",
        9 => "traffic light",
        10 => "fire hydrant",
        11 => "stop sign",
        12 => "parking meter",
        _ => "object",
    }
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .all(|k| k.class_id != det.class_id || iou(&k.bbox, &det.bbox) < iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

pub fn iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
