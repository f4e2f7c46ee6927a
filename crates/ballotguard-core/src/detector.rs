//! BlazeFace face detector via ONNX Runtime.
//!
//! Lightweight short-range detector: 128×128 input, 896 anchors over two
//! feature-map scales, sigmoid scoring and NMS post-processing. Suited to
//! webcam-distance faces, which is the only range a voting kiosk sees.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const BLAZE_INPUT_SIZE: usize = 128;
const BLAZE_NUM_ANCHORS: usize = 896;
const BLAZE_SCORE_THRESHOLD: f32 = 0.5;
const BLAZE_NMS_THRESHOLD: f32 = 0.3;
/// Raw logits are clamped to ±this before sigmoid, per the reference decoder.
const BLAZE_SCORE_CLAMP: f32 = 100.0;
/// (stride, anchors per cell) for the short-range model's two feature maps.
const BLAZE_ANCHOR_LAYOUT: [(usize, usize); 2] = [(8, 2), (16, 6)];
/// Regressor row: [dx, dy, dw, dh, kp0x, kp0y, ..., kp5x, kp5y].
const BLAZE_REGRESSOR_WIDTH: usize = 16;
const BLAZE_NUM_KEYPOINTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the face detection model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// BlazeFace-based face detector.
pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32)>,
}

impl FaceDetector {
    /// Load the detection ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self {
            session,
            anchors: generate_anchors(),
        })
    }

    /// Detect faces in a grayscale frame, returning boxes sorted by
    /// confidence (best first) in original frame coordinates.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = preprocess(frame, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        if outputs.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model must produce regressors and scores, got {} outputs",
                outputs.len()
            )));
        }

        // The two outputs are [1, 896, 16] regressors and [1, 896, 1] scores.
        // Export order varies between converters, so identify them by size.
        let (_, first) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 0: {e}")))?;
        let (_, second) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 1: {e}")))?;

        let (regressors, scores) = if first.len() >= second.len() {
            (first, second)
        } else {
            (second, first)
        };

        if regressors.len() < BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH
            || scores.len() < BLAZE_NUM_ANCHORS
        {
            return Err(DetectorError::InferenceFailed(format!(
                "unexpected output sizes: {} regressor values, {} scores",
                regressors.len(),
                scores.len()
            )));
        }

        let detections = decode_detections(
            regressors,
            scores,
            &self.anchors,
            width as f32,
            height as f32,
            BLAZE_SCORE_THRESHOLD,
        );

        let mut result = nms(detections, BLAZE_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Resize a grayscale frame to 128×128 with bilinear interpolation and
/// normalize to [0, 1], replicated across three channels (NCHW).
fn preprocess(frame: &[u8], width: usize, height: usize) -> Array4<f32> {
    let size = BLAZE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    if width == 0 || height == 0 || frame.len() < width * height {
        return tensor;
    }

    let scale_x = width as f32 / size as f32;
    let scale_y = height as f32 / size as f32;

    for y in 0..size {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;

        for x in 0..size {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            let normalized = val / 255.0;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// Anchor centers in normalized [0, 1] coordinates for the short-range model:
/// a 16×16 grid with 2 anchors per cell and an 8×8 grid with 6.
fn generate_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(BLAZE_NUM_ANCHORS);
    for &(stride, per_cell) in &BLAZE_ANCHOR_LAYOUT {
        let grid = BLAZE_INPUT_SIZE / stride;
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push((cx, cy));
                }
            }
        }
    }
    anchors
}

fn sigmoid(x: f32) -> f32 {
    let clamped = x.clamp(-BLAZE_SCORE_CLAMP, BLAZE_SCORE_CLAMP);
    1.0 / (1.0 + (-clamped).exp())
}

/// Decode anchor-relative regressors into frame-space bounding boxes.
fn decode_detections(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[(f32, f32)],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let input = BLAZE_INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for (idx, &(ax, ay)) in anchors.iter().enumerate().take(BLAZE_NUM_ANCHORS) {
        let score = sigmoid(scores[idx]);
        if score <= threshold {
            continue;
        }

        let row = idx * BLAZE_REGRESSOR_WIDTH;
        let cx = ax + regressors[row] / input;
        let cy = ay + regressors[row + 1] / input;
        let w = regressors[row + 2] / input;
        let h = regressors[row + 3] / input;

        let x1 = ((cx - w / 2.0) * frame_w).max(0.0);
        let y1 = ((cy - h / 2.0) * frame_h).max(0.0);
        let x2 = ((cx + w / 2.0) * frame_w).min(frame_w);
        let y2 = ((cy + h / 2.0) * frame_h).min(frame_h);

        let mut keypoints = [(0.0f32, 0.0f32); BLAZE_NUM_KEYPOINTS];
        for (k, kp) in keypoints.iter_mut().enumerate() {
            let kx = ax + regressors[row + 4 + k * 2] / input;
            let ky = ay + regressors[row + 5 + k * 2] / input;
            *kp = (kx * frame_w, ky * frame_h);
        }

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            confidence: score,
            keypoints: Some(keypoints),
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
