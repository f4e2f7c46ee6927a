//! Face embedding extraction via ONNX Runtime.
//!
//! Produces 128-dimensional L2-normalized descriptors from a square face
//! crop, using a MobileFaceNet-style recognition model.

use crate::types::{BoundingBox, FaceDescriptor, DESCRIPTOR_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
/// Margin added around the detector box on each side, as a fraction of the
/// box's larger dimension. Gives the embedder forehead/chin context.
const CROP_MARGIN: f32 = 0.25;
const EMBED_MODEL_VERSION: &str = "mobilefacenet-v1";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the face recognition model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Recognition model wrapper producing [`FaceDescriptor`] values.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face recognition model"
        );

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected face in a grayscale frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<FaceDescriptor, RecognizerError> {
        let crop = crop_face(frame, width as usize, height as usize, face);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(FaceDescriptor {
            values: l2_normalize(raw.to_vec()),
            model_version: Some(EMBED_MODEL_VERSION.to_string()),
        })
    }
}

/// Cut a square crop around the face box (with margin) and bilinear-resize
/// it to 112×112. Out-of-frame samples are filled with black.
fn crop_face(frame: &[u8], width: usize, height: usize, face: &BoundingBox) -> Vec<u8> {
    let size = EMBED_INPUT_SIZE;
    let mut crop = vec![0u8; size * size];
    if width == 0 || height == 0 || frame.len() < width * height {
        return crop;
    }

    let center_x = face.x + face.width / 2.0;
    let center_y = face.y + face.height / 2.0;
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    if side <= 0.0 {
        return crop;
    }

    let origin_x = center_x - side / 2.0;
    let origin_y = center_y - side / 2.0;
    let step = side / size as f32;

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < width as i32 && y >= 0 && y < height as i32 {
            frame[y as usize * width + x as usize] as f32
        } else {
            0.0
        }
    };

    for oy in 0..size {
        let sy = origin_y + (oy as f32 + 0.5) * step - 0.5;
        let y0 = sy.floor() as i32;
        let fy = sy - y0 as f32;

        for ox in 0..size {
            let sx = origin_x + (ox as f32 + 0.5) * step - 0.5;
            let x0 = sx.floor() as i32;
            let fx = sx - x0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            crop[oy * size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    crop
}

/// Preprocess a 112×112 grayscale crop into a symmetric-normalized NCHW tensor.
fn preprocess(crop: &[u8]) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// L2-normalize a raw embedding. A zero vector is returned unchanged.
fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            keypoints: None,
        }
    }

    #[test]
    fn preprocess_output_shape() {
        let crop = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE]);
    }

    #[test]
    fn preprocess_symmetric_normalization() {
        let crop = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = preprocess(&crop);
        let expected = (128.0 - EMBED_MEAN) / EMBED_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn preprocess_channels_identical() {
        let crop = vec![100u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = preprocess(&crop);
        for y in [0, 55, 111] {
            for x in [0, 55, 111] {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn crop_uniform_frame_stays_uniform() {
        let frame = vec![200u8; 640 * 480];
        let crop = crop_face(&frame, 640, 480, &face_at(200.0, 150.0, 120.0, 120.0));
        assert!(crop.iter().all(|&p| p == 200));
    }

    #[test]
    fn crop_near_edge_fills_black() {
        // Face hugging the top-left corner: the margin reaches outside the
        // frame, so the crop's first pixels must be filled, not garbage.
        let frame = vec![255u8; 100 * 100];
        let crop = crop_face(&frame, 100, 100, &face_at(0.0, 0.0, 40.0, 40.0));
        assert_eq!(crop[0], 0);
        // The face interior still samples bright pixels.
        let center = EMBED_INPUT_SIZE / 2;
        assert!(crop[center * EMBED_INPUT_SIZE + center] > 200);
    }

    #[test]
    fn crop_degenerate_box_is_black() {
        let frame = vec![255u8; 100 * 100];
        let crop = crop_face(&frame, 100, 100, &face_at(50.0, 50.0, 0.0, 0.0));
        assert!(crop.iter().all(|&p| p == 0));
    }

    #[test]
    fn l2_normalize_unit_length() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(vec![0.0; 4]), vec![0.0; 4]);
    }
}
