//! Face-embedding engine: owns the detection and recognition models behind
//! a single load-once readiness state.
//!
//! The engine is an explicitly constructed instance, not a global: callers
//! inject it where inference is needed and hold the only handle. Every
//! inference method checks readiness rather than assuming it.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceDetection;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "blazeface.onnx";
const EMBEDDER_MODEL_FILE: &str = "mobilefacenet.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("face engine is not initialized")]
    NotReady,
    #[error("no face detected in frame")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    Inference(String),
}

impl From<DetectorError> for EngineError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(p) => EngineError::ModelLoad(p),
            other => EngineError::Inference(other.to_string()),
        }
    }
}

impl From<RecognizerError> for EngineError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(p) => EngineError::ModelLoad(p),
            other => EngineError::Inference(other.to_string()),
        }
    }
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// Detection + recognition model pair with load-once semantics.
pub struct FaceEngine {
    model_dir: PathBuf,
    models: Option<Models>,
}

impl FaceEngine {
    /// Create an engine pointing at a model directory. Cheap; no I/O happens
    /// until [`initialize`](Self::initialize).
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            models: None,
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(EMBEDDER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// True once both models are loaded.
    pub fn is_ready(&self) -> bool {
        self.models.is_some()
    }

    /// Check whether both model files exist without loading them.
    pub fn models_present(&self) -> bool {
        Path::new(&self.detector_model_path()).exists()
            && Path::new(&self.embedder_model_path()).exists()
    }

    /// Load both models. Idempotent: a no-op once ready, so it is safe to
    /// call on every session start.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.is_ready() {
            return Ok(());
        }

        let detector = FaceDetector::load(&self.detector_model_path())
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&self.embedder_model_path())
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        self.models = Some(Models {
            detector,
            recognizer,
        });
        tracing::info!(model_dir = %self.model_dir.display(), "face engine initialized");
        Ok(())
    }

    /// Detect and embed the single best face in a grayscale frame.
    ///
    /// Multi-face frames are not rejected: only the highest-confidence
    /// detection is embedded. Zero faces is `NoFaceDetected`. Failed frames
    /// are retried by the polling layer, never here.
    pub fn extract_descriptor(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<FaceDetection, EngineError> {
        let models = self.models.as_mut().ok_or(EngineError::NotReady)?;

        let faces = models.detector.detect(frame, width, height)?;
        let face = faces.into_iter().next().ok_or(EngineError::NoFaceDetected)?;

        let descriptor = models
            .recognizer
            .extract(frame, width, height, &face)?;

        let confidence = face.confidence;
        Ok(FaceDetection {
            descriptor,
            bounding_box: face,
            confidence,
        })
    }

    /// Detection only — no embedding. Used by the quality evaluator where a
    /// confidence and box are enough and the embedding cost is unwanted.
    pub(crate) fn detect_best_face(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<crate::types::BoundingBox>, EngineError> {
        let models = self.models.as_mut().ok_or(EngineError::NotReady)?;
        let faces = models.detector.detect(frame, width, height)?;
        Ok(faces.into_iter().next())
    }
}
