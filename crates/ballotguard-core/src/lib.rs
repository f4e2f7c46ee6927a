//! ballotguard-core — Face detection, descriptor extraction, and quality
//! assessment for duplicate-vote prevention.
//!
//! Uses a BlazeFace-style detector and a MobileFaceNet-style embedder, both
//! running via ONNX Runtime for CPU inference. No pixel data ever leaves
//! this crate: the only exported biometric artifact is the 128-dimensional
//! descriptor and its wire wrapper.

pub mod detector;
pub mod engine;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use engine::{EngineError, FaceEngine};
pub use quality::{QualityAssessment, QualityThresholds};
pub use types::{
    match_confidence, BoundingBox, DuplicateMatch, FaceDescriptor, FaceDetection, FaceSignature,
    DESCRIPTOR_DIM,
};
