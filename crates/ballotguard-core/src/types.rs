use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of a face descriptor produced by the embedding model.
pub const DESCRIPTOR_DIM: usize = 128;

/// Wire-format version stamped into every [`FaceSignature`].
pub const SIGNATURE_VERSION: &str = "1.0";

/// Bounding box for a detected face, with the detector's six keypoints
/// (eyes, nose tip, mouth center, ears) when the model provides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub keypoints: Option<[(f32, f32); 6]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Fixed-length biometric embedding of one detected face.
///
/// Never contains pixel data — only the derived numeric vector. Immutable
/// once produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "mobilefacenet-v1").
    pub model_version: Option<String>,
}

impl FaceDescriptor {
    /// Compute Euclidean distance to another descriptor. Lower = more similar.
    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Convert a match distance to a confidence in [0, 1].
pub fn match_confidence(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

/// Serialization wrapper for a descriptor crossing the network boundary.
///
/// The only biometric artifact ever transmitted or stored remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceSignature {
    pub data: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl FaceSignature {
    pub fn from_descriptor(descriptor: &FaceDescriptor) -> Self {
        Self {
            data: descriptor.values.clone(),
            timestamp: Utc::now(),
            version: SIGNATURE_VERSION.to_string(),
        }
    }

    /// Reconstruct the descriptor. Returns `None` when the payload is empty
    /// or not of descriptor length.
    pub fn restore(&self) -> Option<FaceDescriptor> {
        if self.data.len() != DESCRIPTOR_DIM {
            return None;
        }
        Some(FaceDescriptor {
            values: self.data.clone(),
            model_version: None,
        })
    }
}

/// A positive hit from a duplicate check, best match first in any list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMatch {
    pub subject_id: String,
    pub confidence: f32,
    pub distance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Per-frame result of a full detection + embedding pass.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub descriptor: FaceDescriptor,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}
