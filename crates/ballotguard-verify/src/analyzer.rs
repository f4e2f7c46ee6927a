//! Async seam over the face engine.
//!
//! Model inference is CPU-bound and the engine needs `&mut`, so the real
//! implementation runs the engine on a dedicated OS thread behind a
//! depth-one request channel. The bounded channel is load-bearing: at most
//! one frame can wait while another is inferred, so a slow device skips
//! ticks instead of building an inference backlog.

use async_trait::async_trait;
use ballotguard_core::{
    EngineError, FaceDetection, FaceEngine, QualityAssessment, QualityThresholds,
};
use ballotguard_hw::Frame;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug, Clone)]
pub enum AnalyzerError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("no face detected in frame")]
    NoFace,
    #[error("face analysis failed: {0}")]
    Inference(String),
    #[error("analyzer thread exited")]
    ChannelClosed,
}

impl From<EngineError> for AnalyzerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ModelLoad(m) => AnalyzerError::ModelLoad(m),
            EngineError::NoFaceDetected => AnalyzerError::NoFace,
            EngineError::NotReady => AnalyzerError::Inference("engine not initialized".into()),
            EngineError::Inference(m) => AnalyzerError::Inference(m),
        }
    }
}

/// Face analysis operations the capture session depends on.
///
/// One implementation wraps the real ONNX engine; tests substitute scripted
/// stubs.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Load models. Idempotent; callers bound the wait with a timeout.
    async fn initialize(&self) -> Result<(), AnalyzerError>;

    /// Quality-assess one frame. Never fails; degraded outcomes come back
    /// as low-quality assessments.
    async fn assess(&self, frame: Frame) -> QualityAssessment;

    /// Extract the final descriptor from one frame.
    async fn extract(&self, frame: Frame) -> Result<FaceDetection, AnalyzerError>;
}

enum AnalyzerRequest {
    Initialize {
        reply: oneshot::Sender<Result<(), AnalyzerError>>,
    },
    Assess {
        frame: Frame,
        reply: oneshot::Sender<QualityAssessment>,
    },
    Extract {
        frame: Frame,
        reply: oneshot::Sender<Result<FaceDetection, AnalyzerError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineAnalyzer {
    tx: mpsc::Sender<AnalyzerRequest>,
}

impl EngineAnalyzer {
    /// Spawn the engine on a dedicated thread. Models are not loaded here —
    /// loading happens on the first `initialize` so the session can report
    /// an explicit initializing state with a bounded wait.
    pub fn spawn(model_dir: impl Into<PathBuf>, thresholds: QualityThresholds) -> Self {
        let model_dir = model_dir.into();
        // Capacity 1: one request in flight, one queued, nothing more.
        let (tx, mut rx) = mpsc::channel::<AnalyzerRequest>(1);

        std::thread::Builder::new()
            .name("ballotguard-analyzer".into())
            .spawn(move || {
                let mut engine = FaceEngine::new(model_dir);
                tracing::info!("analyzer thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        AnalyzerRequest::Initialize { reply } => {
                            let result = engine.initialize().map_err(AnalyzerError::from);
                            let _ = reply.send(result);
                        }
                        AnalyzerRequest::Assess { frame, reply } => {
                            let assessment =
                                engine.assess(&frame.data, frame.width, frame.height, &thresholds);
                            let _ = reply.send(assessment);
                        }
                        AnalyzerRequest::Extract { frame, reply } => {
                            let result = engine
                                .extract_descriptor(&frame.data, frame.width, frame.height)
                                .map_err(AnalyzerError::from);
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!("analyzer thread exiting");
            })
            .expect("failed to spawn analyzer thread");

        Self { tx }
    }
}

#[async_trait]
impl FaceAnalyzer for EngineAnalyzer {
    async fn initialize(&self) -> Result<(), AnalyzerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AnalyzerRequest::Initialize { reply: reply_tx })
            .await
            .map_err(|_| AnalyzerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AnalyzerError::ChannelClosed)?
    }

    async fn assess(&self, frame: Frame) -> QualityAssessment {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(AnalyzerRequest::Assess {
                frame,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return QualityAssessment::unavailable("face analysis unavailable");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| QualityAssessment::unavailable("face analysis unavailable"))
    }

    async fn extract(&self, frame: Frame) -> Result<FaceDetection, AnalyzerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AnalyzerRequest::Extract {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AnalyzerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AnalyzerError::ChannelClosed)?
    }
}
